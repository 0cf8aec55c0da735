use muxdedup_core::Mux;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Attributes that are never copied between duplicates and never count as an update.
pub const NO_COPY_FIELDS: [&str; 7] = [
    "uuid",
    "services",
    "scan_result",
    "epg_module_id",
    "created",
    "scan_first",
    "scan_last",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub newer: String,
    pub older: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub diffs: Vec<FieldDiff>,
    pub nupdates: usize,
}

impl MergeOutcome {
    fn record<T: PartialEq + Clone + ToString>(
        &mut self,
        field: &str,
        newer: &T,
        older: &mut T,
        allow_merge: bool,
    ) {
        if *newer == *older {
            return;
        }
        self.diffs.push(FieldDiff {
            field: field.to_string(),
            newer: newer.to_string(),
            older: older.to_string(),
        });
        if allow_merge {
            *older = newer.clone();
            self.nupdates += 1;
        }
    }
}

/// Diff every copyable attribute of `newer` against `older`. With
/// `allow_merge`, differing values are also copied onto `older`.
///
/// Attributes missing from `older` compare as an empty string. Attributes only
/// `older` carries are left alone.
pub fn merge_fields(newer: &Mux, older: &mut Mux, allow_merge: bool) -> MergeOutcome {
    let mut out = MergeOutcome::default();

    out.record("orbital", &newer.orbital, &mut older.orbital, allow_merge);
    out.record("polarisation", &newer.polarisation, &mut older.polarisation, allow_merge);
    out.record("frequency", &newer.frequency, &mut older.frequency, allow_merge);
    out.record("cridauth", &newer.cridauth, &mut older.cridauth, allow_merge);
    out.record("pnetwork_name", &newer.pnetwork_name, &mut older.pnetwork_name, allow_merge);

    for (field, value) in &newer.extra {
        if NO_COPY_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let current = older
            .extra
            .get(field)
            .cloned()
            .unwrap_or_else(|| JsonValue::String(String::new()));
        if current == *value {
            continue;
        }
        out.diffs.push(FieldDiff {
            field: field.clone(),
            newer: display_value(value),
            older: display_value(&current),
        });
        if allow_merge {
            older.extra.insert(field.clone(), value.clone());
            out.nupdates += 1;
        }
    }

    out
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
