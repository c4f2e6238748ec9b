use airq_core::{
    FlatRecord, FlattenScheme, Place,
    present::{Series, aqi_label, fmt_time, fmt_value},
};

pub fn render_summary(place: &Place, latest: Option<&FlatRecord>, scheme: &FlattenScheme) -> String {
    let mut out = format!("Location: {place} ({})\n", place.coords);

    let Some(record) = latest else {
        out.push_str("No results found! Please try again.\n");
        return out;
    };

    match record.aqi {
        Some(aqi) => out.push_str(&format!("Current AQI: {aqi} ({})\n", aqi_label(aqi))),
        None => out.push_str("Current AQI: n/a\n"),
    }
    out.push_str(&format!("Last Updated: {}\n", fmt_time(record.timestamp)));

    if !record.pollutants.is_empty() {
        out.push_str("\nPollutants (µg/m³):\n");
        let width = record.pollutants.keys().map(|k| scheme.leaf(k).len()).max().unwrap_or(0);
        for (column, value) in &record.pollutants {
            out.push_str(&format!("  {:<width$}  {}\n", scheme.leaf(column), fmt_value(*value)));
        }
    }

    if !record.is_complete() {
        out.push_str(&format!("\n{} value(s) missing from this reading.\n", record.issues.len()));
    }

    out
}

/// Plain left-aligned table, one row per record.
pub fn render_table(records: &[FlatRecord], scheme: &FlattenScheme) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };

    let columns: Vec<&str> = first.pollutants.keys().map(String::as_str).collect();

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len() + 1);
    let mut header = vec!["time".to_string(), "aqi".to_string()];
    header.extend(columns.iter().map(|c| scheme.leaf(c).to_string()));
    rows.push(header);

    for record in records {
        let mut row = vec![
            fmt_time(record.timestamp),
            record.aqi.map_or_else(|| "n/a".to_string(), |aqi| aqi.to_string()),
        ];
        row.extend(columns.iter().map(|c| fmt_value(record.pollutants.get(*c).copied().flatten())));
        rows.push(row);
    }

    let widths: Vec<usize> = (0..rows[0].len())
        .map(|i| rows.iter().map(|row| row[i].chars().count()).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for (n, row) in rows.iter().enumerate() {
        let line: Vec<String> =
            row.iter().zip(&widths).map(|(cell, &w)| format!("{cell:<w$}")).collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
        if n == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            out.push_str(&rule.join("  "));
            out.push('\n');
        }
    }
    out
}

/// Min / max / last per series.
pub fn render_series(series: &[Series], scheme: &FlattenScheme) -> String {
    if series.iter().all(|s| s.points.is_empty()) {
        return "No historical data available.\n".to_string();
    }

    let width = series.iter().map(|s| scheme.leaf(&s.name).len()).max().unwrap_or(0);
    let mut out = String::new();
    for s in series {
        let values: Vec<f64> = s.points.iter().filter_map(|p| p.value).collect();
        let min = values.iter().copied().reduce(f64::min);
        let max = values.iter().copied().reduce(f64::max);
        let last = s.points.last().and_then(|p| p.value);
        out.push_str(&format!(
            "  {:<width$}  min {}  max {}  last {}  ({} points)\n",
            scheme.leaf(&s.name),
            fmt_value(min),
            fmt_value(max),
            fmt_value(last),
            s.points.len(),
        ));
    }
    out
}
