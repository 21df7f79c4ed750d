//! Fixed-width table to CSV conversion.
//!
//! Column boundaries are inferred from the text itself: a column is a run
//! of character positions where at least one row has a non-blank
//! character. The first non-empty row is the header.

use std::borrow::Cow;

/// Box-drawing characters used as vertical separators in CLI tables.
fn is_vertical_rule(c: char) -> bool {
    matches!(c, '│' | '┃' | '║' | '|')
}

/// True for horizontal rules such as `━━━━` or `----  ----`.
fn is_rule_line(line: &[char]) -> bool {
    let mut saw_rule = false;
    for &c in line {
        if c.is_whitespace() {
            continue;
        }
        if ('\u{2500}'..='\u{257F}').contains(&c) || matches!(c, '-' | '=' | '+') {
            saw_rule = true;
        } else {
            return false;
        }
    }
    saw_rule
}

fn normalize_line(line: &str) -> Vec<char> {
    line.trim_end_matches(['\r', '\n'])
        .chars()
        .map(|c| if is_vertical_rule(c) || c == '\t' { ' ' } else { c })
        .collect()
}

/// Column spans `[start, end)` in character positions.
pub fn infer_columns(rows: &[Vec<char>]) -> Vec<(usize, usize)> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut occupied = vec![false; width];
    for row in rows {
        for (i, c) in row.iter().enumerate() {
            if !c.is_whitespace() {
                occupied[i] = true;
            }
        }
    }

    let mut spans = Vec::new();
    let mut start = None;
    for (i, used) in occupied.iter().enumerate() {
        match (start, *used) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, width));
    }
    spans
}

fn cell(row: &[char], (start, end): (usize, usize)) -> String {
    if start >= row.len() {
        return String::new();
    }
    row[start..end.min(row.len())]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Quote a field when it contains a delimiter, quote or newline.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Render one CSV record, newline-terminated.
pub fn csv_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut record = fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    record.push('\n');
    record
}

/// Convert a fixed-width table to CSV.
///
/// Blank lines and horizontal rules are dropped before inference. Returns
/// an empty string when no rows remain.
pub fn fixed_width_to_csv<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let rows: Vec<Vec<char>> = lines
        .into_iter()
        .map(normalize_line)
        .filter(|row| row.iter().any(|c| !c.is_whitespace()))
        .filter(|row| !is_rule_line(row))
        .collect();

    let spans = infer_columns(&rows);
    let mut csv = String::new();
    for row in &rows {
        let cells: Vec<String> = spans.iter().map(|span| cell(row, *span)).collect();
        csv.push_str(&csv_record(&cells));
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_table() {
        let table = [
            "NETUID  NAME    EMISSION",
            "1       alpha   0.10",
            "12      beta    0.25",
        ];
        assert_eq!(
            fixed_width_to_csv(table),
            "NETUID,NAME,EMISSION\n1,alpha,0.10\n12,beta,0.25\n"
        );
    }

    #[test]
    fn test_multi_word_header_stays_one_column() {
        let table = ["UID  TOTAL STAKE  RANK", "0    1000.5       0.9", "1    3.0          0.1"];
        assert_eq!(
            fixed_width_to_csv(table),
            "UID,TOTAL STAKE,RANK\n0,1000.5,0.9\n1,3.0,0.1\n"
        );
    }

    #[test]
    fn test_missing_cells_are_empty() {
        let table = ["A    B    C", "1         3", "4    5"];
        assert_eq!(fixed_width_to_csv(table), "A,B,C\n1,,3\n4,5,\n");
    }

    #[test]
    fn test_rules_blank_lines_and_bars_are_dropped() {
        let table = [
            "",
            " NETUID ┃ NAME  ",
            "━━━━━━━━╇━━━━━━━",
            " 3      │ gamma ",
            "   ",
        ];
        assert_eq!(fixed_width_to_csv(table), "NETUID,NAME\n3,gamma\n");
    }

    #[test]
    fn test_fields_needing_quotes() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("1,234"), "\"1,234\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_record(&["a,b", "c"]), "\"a,b\",c\n");
    }

    #[test]
    fn test_non_ascii_columns_align_by_character() {
        let table = ["NAME   STAKE", "τao    τ1.5", "x      2"];
        assert_eq!(fixed_width_to_csv(table), "NAME,STAKE\nτao,τ1.5\nx,2\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(fixed_width_to_csv(Vec::<&str>::new()), "");
        assert_eq!(fixed_width_to_csv(["   ", ""]), "");
    }
}
