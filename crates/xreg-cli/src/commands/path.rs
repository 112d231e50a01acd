//! Attribute path inspection

use clap::Args;
use xreg_core::Path;

#[derive(Args)]
pub struct PathArgs {
    /// Attribute path in display form, e.g. `labels['a.b'][0]`
    pub path: String,
}

pub fn run(args: &PathArgs) -> anyhow::Result<()> {
    let path = Path::parse(&args.path)?;
    println!("display:  {}", path);
    println!("storage:  {}", path.to_storage());
    println!("abstract: {}", path.to_abstract());
    Ok(())
}
