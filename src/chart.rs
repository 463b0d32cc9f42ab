//! Interactive timeline charts as standalone HTML documents.
//!
//! The chart is a Vega-Lite specification rendered in the browser by
//! `vega-embed`: a main panel of release notes per release type, and a
//! selector panel below whose x brush drives the main panel's time range.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::config::Product;
use crate::forecast::{ForecastPoint, FORECAST_KIND, FORECAST_NOTE};
use crate::release::ReleaseRecord;

pub const TIMELINE_TITLE: &str = "Big Query Release Notes";
pub const FORECAST_TITLE: &str = "Big Query Release Notes With Forecasted Next Note";
const SELECTOR_TITLE: &str =
    "Drag the middle and edges of the selection box to change the range above";

const WIDTH: u32 = 800;
const MAIN_HEIGHT: u32 = 300;
const SELECTOR_HEIGHT: u32 = 130;
const BACKGROUND: &str = "#F8F9FA";
const BRUSH_FILL: &str = "#5F6368";
const BRUSH_OPACITY: f64 = 0.2;
const UNKNOWN_COLOR: &str = "#9AA0A6";
/// Records shown in the initial window, counted back from the newest.
const INITIAL_WINDOW: usize = 100;
const PRETTY_DATE: &str = "%m/%d/%Y";

const VEGA_SCRIPTS: [&str; 3] = [
    "https://cdn.jsdelivr.net/npm/vega@5",
    "https://cdn.jsdelivr.net/npm/vega-lite@5",
    "https://cdn.jsdelivr.net/npm/vega-embed@6",
];

/// Historical timeline. `dataset` must be sorted newest first.
pub fn render_timeline(dataset: &[ReleaseRecord], products: &[Product]) -> String {
    let spec = build_spec(TIMELINE_TITLE, dataset, None, products);
    html_document(TIMELINE_TITLE, &spec)
}

/// Timeline with one forecast point and prediction interval per product.
pub fn render_forecast(
    dataset: &[ReleaseRecord],
    forecast: &[ForecastPoint],
    products: &[Product],
    confidence_level: f64,
) -> String {
    let spec = build_spec(
        FORECAST_TITLE,
        dataset,
        Some((forecast, confidence_level)),
        products,
    );
    html_document(FORECAST_TITLE, &spec)
}

fn build_spec(
    title: &str,
    dataset: &[ReleaseRecord],
    forecast: Option<(&[ForecastPoint], f64)>,
    products: &[Product],
) -> Value {
    let mut categories = release_categories(dataset);
    let color = color_encoding(products);

    let mut main_layers = vec![json!({
        "data": { "name": "releases" },
        "params": [{
            "name": "legend_products",
            "select": { "type": "point", "fields": ["productname"] },
            "bind": "legend"
        }],
        "mark": { "type": "circle", "size": 100 },
        "encoding": {
            "x": {
                "field": "date", "type": "temporal", "title": null,
                "axis": { "orient": "top" },
                "scale": { "domain": { "param": "brush" } }
            },
            "color": color,
            "opacity": {
                "condition": { "param": "legend_products", "value": 1 },
                "value": 0.05
            },
            "tooltip": [
                { "field": "date_pretty", "title": "Date" },
                { "field": "productname", "title": "Product" },
                { "field": "tip", "title": "Note" }
            ]
        }
    })];

    let mut datasets = json!({ "releases": release_rows(dataset, products) });
    let mut window = initial_window(dataset);

    if let Some((points, confidence)) = forecast {
        categories.push(FORECAST_KIND.to_string());
        datasets["forecast"] = Value::Array(forecast_rows(points, products));
        main_layers.extend(forecast_layers(&color, confidence));
        if let (Some((start, _)), Some(upper)) =
            (window, points.iter().map(|p| p.target_upper()).max())
        {
            window = Some((start, upper.date_naive()));
        }
    }

    let y = json!({
        "field": "release", "type": "nominal", "title": "Release Type",
        "sort": categories, "scale": { "domain": categories }
    });
    for layer in &mut main_layers {
        layer["encoding"]["y"] = y.clone();
    }

    let mut brush = json!({
        "name": "brush",
        "select": {
            "type": "interval",
            "encodings": ["x"],
            "mark": { "fill": BRUSH_FILL, "fillOpacity": BRUSH_OPACITY }
        }
    });
    let mut selector_x = json!({ "field": "date", "type": "temporal", "title": null });
    if let Some((start, end)) = window {
        brush["value"] = json!({ "x": [datetime(start), datetime(end)] });
        let oldest = dataset.last().map(|r| r.date).unwrap_or(start);
        selector_x["scale"] = json!({ "domain": [datetime(oldest.min(start)), datetime(end)] });
    }

    let mut selector_color = color.clone();
    selector_color["legend"] = Value::Null;

    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "config": { "view": { "fill": BACKGROUND, "stroke": null } },
        "datasets": datasets,
        "vconcat": [
            {
                "title": title,
                "width": WIDTH,
                "height": MAIN_HEIGHT,
                "layer": main_layers
            },
            {
                "title": SELECTOR_TITLE,
                "width": WIDTH,
                "height": SELECTOR_HEIGHT,
                "data": { "name": "releases" },
                "params": [brush],
                "mark": { "type": "circle" },
                "encoding": {
                    "x": selector_x,
                    "y": {
                        "field": "release", "type": "nominal", "axis": null,
                        "sort": categories, "scale": { "domain": categories }
                    },
                    "color": selector_color
                }
            }
        ]
    })
}

fn forecast_layers(color: &Value, confidence: f64) -> [Value; 2] {
    let pct = (confidence * 100.0).round();
    [
        json!({
            "data": { "name": "forecast" },
            "mark": { "type": "rule", "strokeWidth": 2 },
            "encoding": {
                "x": { "field": "target_lower", "type": "temporal" },
                "x2": { "field": "target_upper" },
                "color": color
            }
        }),
        json!({
            "data": { "name": "forecast" },
            "mark": { "type": "circle", "size": 100 },
            "encoding": {
                "x": { "field": "target", "type": "temporal" },
                "color": color,
                "tooltip": [
                    { "field": "date_pretty_target", "title": "Forecast:" },
                    { "field": "productname", "title": "Product:" },
                    { "field": "tip", "title": "Note" },
                    { "field": "date_pretty_target_lower", "title": format!("Lower Prediction ({}%):", pct) },
                    { "field": "date_pretty_target_upper", "title": format!("Upper Prediction ({}%):", pct) }
                ]
            }
        }),
    ]
}

/// Release types in order of first appearance.
fn release_categories(dataset: &[ReleaseRecord]) -> Vec<String> {
    let mut cats: Vec<String> = Vec::new();
    for r in dataset {
        let label = r.release_kind.as_str();
        if !cats.iter().any(|c| c == label) {
            cats.push(label.to_string());
        }
    }
    cats
}

fn product_style<'a>(products: &'a [Product], id: &'a str) -> (&'a str, &'a str) {
    products
        .iter()
        .find(|p| p.id == id)
        .map(|p| (p.name.as_str(), p.color.as_str()))
        .unwrap_or((id, UNKNOWN_COLOR))
}

fn color_encoding(products: &[Product]) -> Value {
    let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
    let colors: Vec<&str> = products.iter().map(|p| p.color.as_str()).collect();
    json!({
        "field": "productname", "type": "nominal", "title": null,
        "scale": { "domain": names, "range": colors },
        "legend": { "orient": "top-left" }
    })
}

fn release_rows(dataset: &[ReleaseRecord], products: &[Product]) -> Vec<Value> {
    dataset
        .iter()
        .map(|r| {
            let (name, color) = product_style(products, &r.product);
            json!({
                "date": r.date.to_string(),
                "release": r.release_kind.as_str(),
                "tip": r.description,
                "product": r.product,
                "productname": name,
                "colors": color,
                "date_pretty": r.date.format(PRETTY_DATE).to_string(),
            })
        })
        .collect()
}

fn forecast_rows(points: &[ForecastPoint], products: &[Product]) -> Vec<Value> {
    let iso = |t: DateTime<Utc>| t.to_rfc3339();
    let pretty = |t: DateTime<Utc>| t.format(PRETTY_DATE).to_string();
    points
        .iter()
        .map(|p| {
            let (name, color) = product_style(products, &p.product);
            json!({
                "release": FORECAST_KIND,
                "tip": FORECAST_NOTE,
                "product": p.product,
                "productname": name,
                "colors": color,
                "target": iso(p.target()),
                "target_lower": iso(p.target_lower()),
                "target_upper": iso(p.target_upper()),
                "date_pretty_target": pretty(p.target()),
                "date_pretty_target_lower": pretty(p.target_lower()),
                "date_pretty_target_upper": pretty(p.target_upper()),
            })
        })
        .collect()
}

/// From the record `INITIAL_WINDOW` places back (or the oldest) to the newest.
fn initial_window(dataset: &[ReleaseRecord]) -> Option<(NaiveDate, NaiveDate)> {
    let newest = dataset.first()?.date;
    let idx = INITIAL_WINDOW.min(dataset.len() - 1);
    Some((dataset[idx].date, newest))
}

fn datetime(d: NaiveDate) -> Value {
    json!({ "year": d.year(), "month": d.month(), "date": d.day() })
}

fn html_document(title: &str, spec: &Value) -> String {
    let scripts: String = VEGA_SCRIPTS
        .iter()
        .map(|src| format!("  <script src=\"{}\"></script>\n", src))
        .collect();
    // "</" inside the JSON would end the script element early
    let spec_json = spec.to_string().replace("</", "<\\/");
    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
  <meta charset=\"utf-8\">
  <title>{title}</title>
{scripts}</head>
<body>
  <div id=\"chart\"></div>
  <script>
    vegaEmbed('#chart', {spec_json}, {{ actions: false }});
  </script>
</body>
</html>
",
        title = escape_html(title),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
