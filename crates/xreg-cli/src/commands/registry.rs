//! Registry commands: read and edit entities without a running server

use clap::{Args, ValueEnum};
use serde_json::Value;
use xreg_core::{Target, WriteOptions};
use xreg_server::Action;

use crate::output::format_output;
use crate::AppContext;

#[derive(Args)]
pub struct GetArgs {
    /// Entity or collection, e.g. `/endpoints/e1`
    #[arg(default_value = "/")]
    pub xid: String,
    /// Nested collections to include (repeatable, comma separated)
    #[arg(short, long)]
    pub inline: Vec<String>,
    /// Filter expressions; repeats are OR-ed, commas AND-ed
    #[arg(long)]
    pub filter: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WriteMethod {
    Put,
    Patch,
    Post,
}

#[derive(Args)]
pub struct WriteArgs {
    /// Target entity or collection
    pub xid: String,
    /// JSON body
    #[arg(default_value = "{}")]
    pub body: String,
    /// Write semantics
    #[arg(long, value_enum, default_value = "put")]
    pub method: WriteMethod,
    /// Expected epoch of the target
    #[arg(long)]
    pub epoch: Option<u64>,
    /// Version to make latest
    #[arg(long = "set-latest")]
    pub set_latest: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    /// Entity to edit
    pub xid: String,
    /// Attribute path, e.g. `labels.stage` or `tags[0]`
    pub path: String,
    /// New value as JSON; anything that isn't valid JSON is stored as a string
    pub value: String,
    /// Expected epoch of the entity being edited
    #[arg(long)]
    pub epoch: Option<u64>,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Group, resource or version to delete
    pub xid: String,
    /// Expected epoch of the target
    #[arg(long)]
    pub epoch: Option<u64>,
    /// Replacement latest version when deleting the latest one
    #[arg(long = "set-latest")]
    pub set_latest: Option<String>,
}

fn write_options(epoch: Option<u64>, set_latest: Option<&String>) -> WriteOptions {
    let mut opts = WriteOptions::default();
    if let Some(epoch) = epoch {
        opts = opts.with_epoch(epoch);
    }
    if let Some(vid) = set_latest {
        opts = opts.with_set_latest(vid.as_str());
    }
    opts
}

/// JSON if it parses, a plain string otherwise
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn target(ctx: &AppContext, xid: &str) -> anyhow::Result<Target> {
    Ok(Target::parse(xid, ctx.service.model())?)
}

pub async fn run_get(args: &GetArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let target = target(ctx, &args.xid)?;
    let value = ctx.service.get(&target, &args.inline, &args.filter).await?;
    println!("{}", format_output(&value, ctx.format)?);
    Ok(())
}

pub async fn run_write(args: &WriteArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let target = target(ctx, &args.xid)?;
    let body: Value = serde_json::from_str(&args.body)
        .map_err(|e| anyhow::anyhow!("Body is not valid JSON: {}", e))?;
    let action = match args.method {
        WriteMethod::Put => Action::Put,
        WriteMethod::Patch => Action::Patch,
        WriteMethod::Post => Action::Post,
    };

    let opts = write_options(args.epoch, args.set_latest.as_ref());
    let reply = ctx.service.write(action, &target, body, opts).await?;
    if let Some(location) = &reply.location {
        tracing::info!("Created {}", location);
    }
    if let Some(body) = &reply.body {
        println!("{}", format_output(body, ctx.format)?);
    }
    Ok(())
}

pub async fn run_set(args: &SetArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let target = target(ctx, &args.xid)?;
    let value = parse_value(&args.value);
    let opts = write_options(args.epoch, None);
    let entity = ctx
        .service
        .set_attribute(&target, &args.path, value, opts)
        .await?;
    println!("{}", format_output(&entity, ctx.format)?);
    Ok(())
}

pub async fn run_delete(args: &DeleteArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let target = target(ctx, &args.xid)?;
    let opts = write_options(args.epoch, args.set_latest.as_ref());
    ctx.service
        .write(Action::Delete, &target, Value::Null, opts)
        .await?;
    println!("Deleted {}", target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("5"), json!(5));
        assert_eq!(parse_value("{\"a\": true}"), json!({"a": true}));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("prod"), json!("prod"));
    }

    #[test]
    fn test_write_options() {
        let set_latest = "2".to_string();
        let opts = write_options(Some(3), Some(&set_latest));
        assert_eq!(opts.epoch, Some(3));
        assert_eq!(opts.set_latest.as_deref(), Some("2"));
        assert!(write_options(None, None).epoch.is_none());
    }
}
