//! Template field extraction.
//!
//! Templates use a Django-style mini-language. Data is reached only through
//! loops over `<datasource>.<table>`:
//!
//! ```text
//! {% for account in midaz_onboarding.account %}
//!   {{ account.alias }} {{ account.metadata.cost_center|default:"-" }}
//!   {% for entry in account.entries %}{{ entry.amount }}{% endfor %}
//! {% endfor %}
//! ```
//!
//! yields `midaz_onboarding -> account -> [alias, entries.amount, metadata.cost_center]`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppResult, BusinessError};
use crate::models::MappedFields;

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*script\b").expect("Invalid script tag pattern"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%-?\s*(.*?)\s*-?%\}|\{\{-?\s*(.*?)\s*-?\}\}").expect("Invalid tag pattern")
});

static FOR_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^for\s+(?:[A-Za-z_]\w*\s*,\s*)?([A-Za-z_]\w*)\s+in\s+([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+)",
    )
    .expect("Invalid for tag pattern")
});

static FIELD_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)((?:\.[A-Za-z_]\w*)+)").expect("Invalid field access pattern")
});

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("Invalid string literal pattern")
});

/// What a loop variable is bound to.
#[derive(Debug, Clone)]
struct Binding {
    variable: String,
    datasource: String,
    table: String,
    /// Path inside the row for loops over nested arrays.
    prefix: Vec<String>,
}

#[derive(Default)]
struct FieldCollector {
    scopes: Vec<Binding>,
    fields: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl FieldCollector {
    fn lookup(&self, variable: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find(|b| b.variable == variable)
    }

    fn table_entry(&mut self, datasource: &str, table: &str) -> &mut BTreeSet<String> {
        self.fields
            .entry(datasource.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
    }

    fn open_loop(&mut self, variable: &str, source: &str) {
        let mut segments = source.split('.');
        let head = segments.next().unwrap_or_default();
        let rest: Vec<String> = segments.map(str::to_string).collect();

        let binding = match self.lookup(head).cloned() {
            Some(parent) => {
                let mut prefix = parent.prefix;
                prefix.extend(rest);
                Binding {
                    variable: variable.to_string(),
                    datasource: parent.datasource,
                    table: parent.table,
                    prefix,
                }
            }
            None => {
                let binding = Binding {
                    variable: variable.to_string(),
                    datasource: head.to_string(),
                    table: rest.join("."),
                    prefix: Vec::new(),
                };
                self.table_entry(&binding.datasource, &binding.table);
                binding
            }
        };

        self.scopes.push(binding);
    }

    fn close_loop(&mut self) {
        self.scopes.pop();
    }

    fn scan_expression(&mut self, expression: &str) {
        let expression = STRING_LITERAL.replace_all(expression, "");

        let accesses: Vec<(String, String)> = FIELD_ACCESS
            .captures_iter(&expression)
            .filter(|caps| {
                // `row.a` inside `other.row.a` is not a variable access
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                !expression[..start].ends_with('.')
            })
            .map(|caps| (caps[1].to_string(), caps[2][1..].to_string()))
            .collect();

        for (variable, path) in accesses {
            let Some(binding) = self.lookup(&variable).cloned() else {
                continue;
            };

            let mut segments = binding.prefix.clone();
            segments.extend(path.split('.').map(str::to_string));
            let field = segments.join(".");

            self.table_entry(&binding.datasource, &binding.table)
                .insert(field);
        }
    }

    fn finish(self) -> MappedFields {
        self.fields
            .into_iter()
            .map(|(datasource, tables)| {
                let tables = tables
                    .into_iter()
                    .map(|(table, fields)| (table, fields.into_iter().collect()))
                    .collect();
                (datasource, tables)
            })
            .collect()
    }
}

/// Fail if the template embeds a `<script>` element.
pub fn reject_script_tags(template: &str) -> AppResult<()> {
    if SCRIPT_TAG.is_match(template) {
        return Err(BusinessError::ScriptTagDetected.into());
    }
    Ok(())
}

/// Map of `datasource -> table -> [field]` referenced by a template.
///
/// Fields are deduplicated and sorted. A loop over a table with no field
/// accesses still lists the table, with no fields.
pub fn extract_fields(template: &str) -> AppResult<MappedFields> {
    reject_script_tags(template)?;

    let mut collector = FieldCollector::default();

    for caps in TAG.captures_iter(template) {
        if let Some(statement) = caps.get(1).map(|m| m.as_str()) {
            if let Some(header) = FOR_TAG.captures(statement) {
                collector.open_loop(&header[1], &header[2]);
            } else if statement == "endfor" {
                collector.close_loop();
            } else {
                collector.scan_expression(statement);
            }
        } else if let Some(expression) = caps.get(2).map(|m| m.as_str()) {
            collector.scan_expression(expression);
        }
    }

    Ok(collector.finish())
}
