//! Profile manifests
//!
//! Each deployment profile carries a fixed list of database objects the
//! application requires, some with an expected argument signature. The
//! signature model is explicit: ordered `{mode, name, type}` triples parsed
//! from the catalog's identity-argument format, compared case-insensitively
//! with whitespace normalized and `DEFAULT` expressions stripped.

use std::fmt;
use std::str::FromStr;

/// Deployment profile a database is verified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Central,
    PlantA,
    PlantB,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Central => "central",
            Profile::PlantA => "plant-a",
            Profile::PlantB => "plant-b",
        }
    }

    /// Subdirectory of the script root holding this profile's scripts.
    pub fn script_dir(&self) -> &'static str {
        match self {
            Profile::Central => "central",
            Profile::PlantA => "plant_a",
            Profile::PlantB => "plant_b",
        }
    }

    /// Plant databases carry federation wiring back to central.
    pub fn is_plant(&self) -> bool {
        matches!(self, Profile::PlantA | Profile::PlantB)
    }

    pub fn all() -> [Profile; 3] {
        [Profile::Central, Profile::PlantA, Profile::PlantB]
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "central" => Ok(Profile::Central),
            "plant-a" | "plant_a" | "planta" => Ok(Profile::PlantA),
            "plant-b" | "plant_b" | "plantb" => Ok(Profile::PlantB),
            other => Err(format!(
                "unknown profile '{}' (expected central, plant-a or plant-b)",
                other
            )),
        }
    }
}

/// Kind of catalog object a requirement names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Function,
    Procedure,
    Table,
    Trigger,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Function => "function",
            ObjectType::Procedure => "procedure",
            ObjectType::Table => "table",
            ObjectType::Trigger => "trigger",
        }
    }
}

/// One required object, optionally with an expected argument signature.
#[derive(Debug, Clone, Copy)]
pub struct DbObjectRequirement {
    pub object_type: ObjectType,
    pub name: &'static str,
    pub signature: Option<&'static str>,
}

const CENTRAL_MANIFEST: &[DbObjectRequirement] = &[
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.asset",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.work_order",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.sensor_reading",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.audit_log",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Function,
        name: "amdb.get_asset_by_tag",
        signature: Some("p_tag text"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Function,
        name: "amdb.list_open_work_orders",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Function,
        name: "amdb.asset_health_summary",
        signature: Some("p_asset_id bigint"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.record_sensor_reading",
        signature: Some("p_asset_id bigint, p_points_json jsonb"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.close_work_order",
        signature: Some("p_work_order_id bigint, p_closed_by text"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.replicate_plant_snapshot",
        signature: Some("p_plant text"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Trigger,
        name: "amdb.trg_asset_audit",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Trigger,
        name: "amdb.trg_work_order_touch",
        signature: None,
    },
];

const PLANT_MANIFEST: &[DbObjectRequirement] = &[
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.asset",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.work_order",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.sensor_reading",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Table,
        name: "amdb.audit_log",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Function,
        name: "amdb.get_asset_by_tag",
        signature: Some("p_tag text"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Function,
        name: "amdb.list_open_work_orders",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.record_sensor_reading",
        signature: Some("p_asset_id bigint, p_points_json jsonb"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.close_work_order",
        signature: Some("p_work_order_id bigint, p_closed_by text"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Procedure,
        name: "amdb.push_readings_central",
        signature: Some("p_batch_json jsonb"),
    },
    DbObjectRequirement {
        object_type: ObjectType::Trigger,
        name: "amdb.trg_asset_audit",
        signature: None,
    },
    DbObjectRequirement {
        object_type: ObjectType::Trigger,
        name: "amdb.trg_work_order_touch",
        signature: None,
    },
];

/// The required-object list for a profile.
pub fn manifest_for(profile: Profile) -> &'static [DbObjectRequirement] {
    match profile {
        Profile::Central => CENTRAL_MANIFEST,
        Profile::PlantA | Profile::PlantB => PLANT_MANIFEST,
    }
}

/// Argument mode in a routine signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    In,
    Out,
    InOut,
    Variadic,
}

/// One parsed signature argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSig {
    pub mode: ArgMode,
    pub name: Option<String>,
    pub type_name: String,
}

/// Type names that span more than one word in the identity-argument format.
/// An argument whose whole remainder matches one of these is unnamed.
const MULTIWORD_TYPES: [&str; 7] = [
    "double precision",
    "timestamp without time zone",
    "timestamp with time zone",
    "time without time zone",
    "time with time zone",
    "character varying",
    "bit varying",
];

fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in raw.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn normalize_type(tokens: &[&str]) -> String {
    tokens.join(" ").to_ascii_lowercase()
}

fn parse_arg(raw: &str) -> Option<ArgSig> {
    let mut tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    // Drop any trailing DEFAULT expression
    if let Some(pos) = tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case("default"))
    {
        tokens.truncate(pos);
        if tokens.is_empty() {
            return None;
        }
    }

    let mode = match tokens[0].to_ascii_lowercase().as_str() {
        "in" => {
            tokens.remove(0);
            ArgMode::In
        }
        "out" => {
            tokens.remove(0);
            ArgMode::Out
        }
        "inout" => {
            tokens.remove(0);
            ArgMode::InOut
        }
        "variadic" => {
            tokens.remove(0);
            ArgMode::Variadic
        }
        _ => ArgMode::In,
    };
    if tokens.is_empty() {
        return None;
    }

    let remainder = normalize_type(&tokens);
    let is_bare_multiword = MULTIWORD_TYPES.iter().any(|t| {
        remainder == *t || remainder.starts_with(&format!("{}(", t))
    });

    if tokens.len() == 1 || is_bare_multiword {
        return Some(ArgSig {
            mode,
            name: None,
            type_name: remainder,
        });
    }

    let name = tokens[0].to_ascii_lowercase();
    Some(ArgSig {
        mode,
        name: Some(name),
        type_name: normalize_type(&tokens[1..]),
    })
}

/// Parse an identity-argument list like
/// `"p_asset_id bigint, OUT result jsonb"` into ordered argument triples.
pub fn parse_signature(raw: &str) -> Vec<ArgSig> {
    split_top_level(raw).into_iter().filter_map(parse_arg).collect()
}

/// Compare two signatures: same arity, same modes and types in order.
/// Names participate only when both sides declare one.
pub fn signatures_match(expected: &str, actual: &str) -> bool {
    let expected = parse_signature(expected);
    let actual = parse_signature(actual);
    if expected.len() != actual.len() {
        return false;
    }
    expected.iter().zip(actual.iter()).all(|(e, a)| {
        if e.mode != a.mode || e.type_name != a.type_name {
            return false;
        }
        match (&e.name, &a.name) {
            (Some(en), Some(an)) => en == an,
            _ => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_round_trip() {
        for profile in Profile::all() {
            assert_eq!(profile.as_str().parse::<Profile>().unwrap(), profile);
        }
        assert!("warehouse".parse::<Profile>().is_err());
    }

    #[test]
    fn test_manifest_profiles_differ() {
        let central = manifest_for(Profile::Central);
        let plant = manifest_for(Profile::PlantA);
        assert!(central.iter().any(|r| r.name == "amdb.replicate_plant_snapshot"));
        assert!(plant.iter().all(|r| r.name != "amdb.replicate_plant_snapshot"));
        assert!(plant.iter().any(|r| r.name == "amdb.push_readings_central"));
    }

    #[test]
    fn test_parse_named_args() {
        let args = parse_signature("p_asset_id bigint, p_points_json jsonb");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].mode, ArgMode::In);
        assert_eq!(args[0].name.as_deref(), Some("p_asset_id"));
        assert_eq!(args[0].type_name, "bigint");
        assert_eq!(args[1].type_name, "jsonb");
    }

    #[test]
    fn test_parse_modes() {
        let args = parse_signature("IN p_tag text, OUT result jsonb, INOUT total numeric");
        assert_eq!(args[0].mode, ArgMode::In);
        assert_eq!(args[1].mode, ArgMode::Out);
        assert_eq!(args[2].mode, ArgMode::InOut);
    }

    #[test]
    fn test_parse_strips_default() {
        let args = parse_signature("p_limit integer DEFAULT 100");
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].name.as_deref(), Some("p_limit"));
        assert_eq!(args[0].type_name, "integer");
    }

    #[test]
    fn test_parse_unnamed_multiword_type() {
        let args = parse_signature("double precision, timestamp without time zone");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].name, None);
        assert_eq!(args[0].type_name, "double precision");
        assert_eq!(args[1].type_name, "timestamp without time zone");
    }

    #[test]
    fn test_parse_keeps_parenthesized_commas_together() {
        let args = parse_signature("p_rate numeric(10,2), p_tag text");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].type_name, "numeric(10,2)");
    }

    #[test]
    fn test_match_is_case_and_whitespace_insensitive() {
        assert!(signatures_match(
            "p_asset_id bigint, p_points_json jsonb",
            "P_ASSET_ID   BIGINT,  p_points_json JSONB"
        ));
    }

    #[test]
    fn test_match_ignores_defaults() {
        assert!(signatures_match(
            "p_limit integer",
            "p_limit integer DEFAULT 100"
        ));
    }

    #[test]
    fn test_match_rejects_type_change() {
        assert!(!signatures_match("p_asset_id bigint", "p_asset_id integer"));
    }

    #[test]
    fn test_match_rejects_arity_change() {
        assert!(!signatures_match("p_tag text", "p_tag text, p_extra int"));
    }

    #[test]
    fn test_match_rejects_mode_change() {
        assert!(!signatures_match("p_total numeric", "OUT p_total numeric"));
    }

    #[test]
    fn test_match_allows_one_sided_names() {
        assert!(signatures_match("text, jsonb", "p_tag text, p_doc jsonb"));
    }
}
