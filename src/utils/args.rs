//! Argument normalization utilities.
//!
//! Transforms CLI arguments before clap parsing so the legacy PascalCase
//! switch spellings keep working:
//!
//! ```text
//! -OutputFolder out            -> --output-folder out
//! -Configuration:Release       -> --configuration=Release
//! -Parameter:Project::Db db01  -> --parameter Project::Db db01
//! ```

use heck::ToKebabCase;

/// Legacy prefix for manual parameter overrides.
const PARAMETER_PREFIX: &str = "-Parameter:";

/// Long flags that take no value.
const SWITCHES: &[&str] = &["erase-sensitive-info", "validate", "help", "version"];

/// Rewrite legacy switches into clap long flags.
///
/// The program name, long flags, short flags, plain values and everything
/// after a bare `--` pass through unchanged. Tokens in value position are
/// never rewritten, so `-Password -Secret1` keeps its value.
pub fn normalize_legacy_switches(args: Vec<String>) -> Vec<String> {
    let mut result = Vec::with_capacity(args.len() + 2);
    let mut iter = args.into_iter();
    let mut pending_values = 0;

    if let Some(program) = iter.next() {
        result.push(program);
    }

    while let Some(arg) = iter.next() {
        if pending_values > 0 {
            pending_values -= 1;
            result.push(arg);
            continue;
        }

        if arg == "--" {
            result.push(arg);
            result.extend(iter);
            break;
        }

        if let Some(name) = arg.strip_prefix(PARAMETER_PREFIX) {
            result.push("--parameter".to_string());
            result.push(name.to_string());
            pending_values = 1;
            continue;
        }

        if let Some(flag) = arg.strip_prefix("--") {
            if !flag.contains('=') {
                pending_values = values_taken(flag);
            }
            result.push(arg);
            continue;
        }

        match legacy_switch(&arg) {
            Some((switch, Some(value))) => result.push(format!("--{}={}", switch, value)),
            Some((switch, None)) => {
                pending_values = values_taken(&switch);
                result.push(format!("--{}", switch));
            }
            None => result.push(arg),
        }
    }

    result
}

/// Number of separate value tokens that follow a long flag.
fn values_taken(flag: &str) -> usize {
    match flag {
        "parameter" => 2,
        flag if SWITCHES.contains(&flag) => 0,
        _ => 1,
    }
}

/// Split `-PascalName[:value]` into its kebab-case flag name and inline value.
fn legacy_switch(arg: &str) -> Option<(String, Option<&str>)> {
    let body = arg.strip_prefix('-')?;
    if body.starts_with('-') {
        return None;
    }

    let (name, value) = match body.split_once(':') {
        Some((name, value)) => (name, Some(value)),
        None => (body, None),
    };

    let mut chars = name.chars();
    let first = chars.next()?;
    // Single letters are short flags (-V, -h).
    if !first.is_ascii_uppercase() || name.len() < 2 || !chars.all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some((name.to_kebab_case(), value))
}
