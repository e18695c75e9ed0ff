//! Command building
//!
//! Renders the invocation text for a resolved routine: `CALL` for
//! procedures, `SELECT` shapes for functions, named-notation arguments
//! bound through numbered placeholders.

use crate::gateway::params::BoundParam;
use crate::gateway::routine::RoutineMetadata;

/// Double-quote an identifier, doubling embedded quotes.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_plain_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Argument names fold to lowercase like unquoted SQL identifiers, so a
/// caller-supplied `AssetId` matches a routine argument `assetid`. Names
/// that cannot stand bare get quoted verbatim instead.
fn param_ident(name: &str) -> String {
    if is_plain_ident(name) {
        name.to_ascii_lowercase()
    } else {
        quote_ident(name)
    }
}

fn argument_list(params: &[BoundParam]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.json {
                format!("{} => ${}::jsonb", param_ident(&p.name), i + 1)
            } else {
                format!("{} => ${}", param_ident(&p.name), i + 1)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the full invocation text for a routine and its marshaled
/// parameters. Placeholder numbers follow parameter order.
pub(crate) fn build_invocation(meta: &RoutineMetadata, params: &[BoundParam]) -> String {
    let target = format!("{}.{}", quote_ident(&meta.schema), quote_ident(&meta.name));
    let args = argument_list(params);

    if meta.is_procedure() {
        format!("CALL {}({})", target, args)
    } else if meta.returns_json() {
        format!("SELECT {}({})::text", target, args)
    } else if meta.returns_set {
        format!("SELECT * FROM {}({})", target, args)
    } else {
        format!("SELECT {}({})", target, args)
    }
}
