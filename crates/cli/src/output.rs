//! Result rendering.

use contributors::{Category, Synopsis};

const CSV_HEADER: [&str; 5] = ["TYPE", "LOGIN", "NAME", "URL", "COUNT"];

/// Renders one row per category membership, categories in output order.
pub fn synopsis_csv(synopsis: &Synopsis) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().copied());
    for category in Category::ALL {
        for record in synopsis.category(category) {
            let count = record.count.to_string();
            push_row(
                &mut out,
                [
                    category.label(),
                    record.login.as_str(),
                    record.name.as_deref().unwrap_or(""),
                    record.url.as_deref().unwrap_or(""),
                    count.as_str(),
                ],
            );
        }
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}
