//! CSV rendering of tabular results.
//!
//! Fields are quoted only when they contain a delimiter, a quote or a line
//! break. Rows are terminated with `\n`.

use serde_json::{Map, Value};
use std::borrow::Cow;

/// Column holding the run time in placeholder rows.
pub const RUN_TIME_COLUMN: &str = "datetime_run";
/// Column holding the warehouse hub id in placeholder rows.
pub const HUB_COLUMN: &str = "wh_hub_id";
/// Query parameter whose value fills [`HUB_COLUMN`].
pub const HUB_PARAM: &str = "wh_id";

/// Renders one JSON value as a CSV cell.
#[must_use]
pub fn cell(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bool(b) => Cow::Owned(b.to_string()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = Cow<'a, str>>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&escape(&field));
    }
    out.push('\n');
}

/// Renders rows under the given header. Missing keys become empty cells.
#[must_use]
pub fn to_csv(columns: &[String], rows: &[Map<String, Value>]) -> String {
    let mut out = String::new();
    push_record(&mut out, columns.iter().map(|c| Cow::Borrowed(c.as_str())));
    for row in rows {
        push_record(
            &mut out,
            columns
                .iter()
                .map(|c| row.get(c).map_or(Cow::Borrowed(""), cell)),
        );
    }
    out
}

/// Header for a result set: the declared columns, or the keys of the first
/// row when none were declared.
#[must_use]
pub fn header_of(columns: &[String], rows: &[Map<String, Value>]) -> Vec<String> {
    if !columns.is_empty() {
        return columns.to_vec();
    }
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// Builds the single row written for an empty result set.
///
/// `datetime_run` carries `run_time` and `wh_hub_id` the `wh_id` parameter;
/// every other column stays empty. Both columns are added to the header if
/// the result declared none.
#[must_use]
pub fn placeholder_row(
    columns: &mut Vec<String>,
    params: &Map<String, Value>,
    run_time: &str,
) -> Map<String, Value> {
    for required in [RUN_TIME_COLUMN, HUB_COLUMN] {
        if !columns.iter().any(|c| c == required) {
            columns.push(required.to_string());
        }
    }

    let mut row: Map<String, Value> = columns
        .iter()
        .map(|c| (c.clone(), Value::Null))
        .collect();
    row.insert(RUN_TIME_COLUMN.to_string(), Value::from(run_time));
    row.insert(
        HUB_COLUMN.to_string(),
        params.get(HUB_PARAM).cloned().unwrap_or(Value::Null),
    );
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_to_csv_keeps_column_order_and_quotes() {
        let columns = vec!["b".to_string(), "a".to_string()];
        let rows = vec![
            row(json!({"a": 1, "b": "plain"})),
            row(json!({"a": null, "b": "has, comma \"q\""})),
        ];

        assert_eq!(
            to_csv(&columns, &rows),
            "b,a\nplain,1\n\"has, comma \"\"q\"\"\",\n"
        );
    }

    #[test]
    fn test_line_breaks_are_quoted() {
        let columns = vec!["note".to_string()];
        let rows = vec![
            row(json!({"note": "two\nlines"})),
            row(json!({"note": "carriage\rreturn"})),
            row(json!({"note": "crlf\r\n"})),
        ];

        assert_eq!(
            to_csv(&columns, &rows),
            "note\n\"two\nlines\"\n\"carriage\rreturn\"\n\"crlf\r\n\"\n"
        );
    }

    #[test]
    fn test_only_special_fields_are_quoted() {
        let columns: Vec<String> = ["a", "b", "c", "d"].iter().map(|c| c.to_string()).collect();
        let rows = vec![row(json!({
            "a": "\"",
            "b": " padded ",
            "c": "semi;colon",
            "d": "it's"
        }))];

        assert_eq!(
            to_csv(&columns, &rows),
            "a,b,c,d\n\"\"\"\", padded ,semi;colon,it's\n"
        );
    }

    #[test]
    fn test_header_fields_are_quoted() {
        let columns = vec!["hub, name".to_string(), "say \"hi\"".to_string()];
        assert_eq!(to_csv(&columns, &[]), "\"hub, name\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn test_non_string_cells_and_missing_keys() {
        let columns: Vec<String> = ["n", "flag", "nil", "list", "absent"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let rows = vec![row(json!({"n": -3.5, "flag": false, "nil": null, "list": ["x", "y"]}))];

        assert_eq!(
            to_csv(&columns, &rows),
            "n,flag,nil,list,absent\n-3.5,false,,\"[\"\"x\"\",\"\"y\"\"]\",\n"
        );
    }

    #[test]
    fn test_cells_render_json_types() {
        assert_eq!(cell(&json!(true)), "true");
        assert_eq!(cell(&json!(2.5)), "2.5");
        assert_eq!(cell(&json!([1, 2])), "[1,2]");
        assert_eq!(cell(&Value::Null), "");
    }

    #[test]
    fn test_header_falls_back_to_first_row() {
        let rows = vec![row(json!({"x": 1}))];
        assert_eq!(header_of(&[], &rows), vec!["x".to_string()]);
        assert!(header_of(&[], &[]).is_empty());
    }

    #[test]
    fn test_placeholder_row() {
        let mut columns = vec!["wh_hub_id".to_string(), "orders".to_string()];
        let params = row(json!({"wh_id": "7"}));

        let placeholder = placeholder_row(&mut columns, &params, "2024-05-01 08:00:00");

        assert_eq!(columns, vec!["wh_hub_id", "orders", "datetime_run"]);
        assert_eq!(
            to_csv(&columns, &[placeholder]),
            "wh_hub_id,orders,datetime_run\n7,,2024-05-01 08:00:00\n"
        );
    }
}
