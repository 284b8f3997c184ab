//! Command-line preparation for user-declared commands.
//!
//! Commands are substituted first (`{{.Package}}`, `{{.Version}}`,
//! `{{.BinPath}}` with the resource's resolved values), then split into argv
//! without ever invoking a shell, so manifest values cannot inject into a
//! shell grammar.

use crate::core::TomeiError;

/// Resolved values available to command templates.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub package: String,
    pub version: String,
    pub bin_path: String,
}

/// Replaces the fixed template tokens with resolved values.
pub fn substitute(command: &str, ctx: &CommandContext) -> String {
    command
        .replace("{{.Package}}", &ctx.package)
        .replace("{{.Version}}", &ctx.version)
        .replace("{{.BinPath}}", &ctx.bin_path)
}

/// Splits a substituted command into argv, shell-free.
pub fn split(resource: &str, command: &str) -> Result<Vec<String>, TomeiError> {
    let argv = shlex::split(command).ok_or_else(|| TomeiError::CommandFailed {
        resource: resource.to_string(),
        command: command.to_string(),
        status: -1,
    })?;
    if argv.is_empty() {
        return Err(TomeiError::CommandFailed {
            resource: resource.to_string(),
            command: command.to_string(),
            status: -1,
        });
    }
    Ok(argv)
}

/// Substitution followed by the argv split.
pub fn prepare(
    resource: &str,
    command: &str,
    ctx: &CommandContext,
) -> Result<Vec<String>, TomeiError> {
    split(resource, &substitute(command, ctx))
}
