/// Renders rows as a markdown table with right-aligned, padded columns.
pub fn format_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            rows.iter()
                .filter_map(|row| row.get(col).map(String::len))
                .fold(header.len(), usize::max)
        })
        .collect();

    let render = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:>width$}"))
            .collect();
        format!("| {} |\n", padded.join(" | "))
    };

    let mut table = render(headers.to_vec());
    let rule: Vec<String> = widths
        .iter()
        .map(|width| format!("{}:", "-".repeat(width.saturating_sub(1))))
        .collect();
    table.push_str(&format!("| {} |\n", rule.join(" | ")));
    for row in rows {
        table.push_str(&render(row.iter().map(String::as_str).collect()));
    }
    table
}
