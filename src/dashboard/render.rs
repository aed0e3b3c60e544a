use super::{CurrentReading, StatusView};
use crate::handlers::predict::AnomalyPrediction;
use std::fmt::Write;

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse}td,th{padding:.3rem .8rem;border:1px solid #ccc;text-align:left}\
.anomaly{color:#b00020;font-weight:bold}.normal{color:#1b5e20;font-weight:bold}\
.error{background:#fdecea;border:1px solid #b00020;padding:.8rem}";

/// Escapes text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_status_page(view: &StatusView) -> String {
    let mut body = String::new();
    if let Some(reading) = &view.reading {
        render_reading(&mut body, reading);
    }
    match &view.result {
        Ok(prediction) => render_prediction(&mut body, prediction),
        Err(err) => {
            let _ = write!(
                body,
                "<div class=\"error {}\"><h2>Anomaly check failed</h2><p>{}</p></div>",
                err.class(),
                escape_html(&err.to_string())
            );
        }
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
<title>AQI Status</title><style>{}</style></head>\
<body><h1>AQI Status</h1>{}</body></html>\n",
        STYLE, body
    )
}

fn render_reading(out: &mut String, reading: &CurrentReading) {
    let _ = write!(
        out,
        "<h2>Current reading</h2><table>\
<tr><th>Timestamp</th><td>{}</td></tr>\
<tr><th>AQI</th><td>{}</td></tr>\
<tr><th>Temperature (&deg;C)</th><td>{}</td></tr>\
<tr><th>Humidity (%)</th><td>{}</td></tr>\
<tr><th>Wind speed (m/s)</th><td>{}</td></tr>\
</table>",
        escape_html(&reading.timestamp),
        reading.aqi_value,
        reading.temperature,
        reading.humidity,
        reading.wind_speed
    );
}

fn render_prediction(out: &mut String, prediction: &AnomalyPrediction) {
    let (class, verdict) = if prediction.is_anomaly {
        ("anomaly", "Anomaly detected")
    } else {
        ("normal", "Within expected range")
    };
    let _ = write!(
        out,
        "<h2>Anomaly check</h2><p class=\"{}\">{}</p><table>\
<tr><th>Predicted AQI</th><td>{:.1}</td></tr>\
<tr><th>Expected range</th><td>{:.1} &ndash; {:.1}</td></tr>\
<tr><th>Deviation</th><td>{:.1}</td></tr>\
</table>",
        class,
        verdict,
        prediction.predicted_mean_aqi,
        prediction.aqi_lower_bound,
        prediction.aqi_upper_bound,
        prediction.deviation
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::DashboardError;

    fn reading() -> CurrentReading {
        CurrentReading {
            timestamp: "2024-06-01T14:00:00Z".into(),
            aqi_value: 155.0,
            temperature: 35.0,
            humidity: 70.0,
            wind_speed: 6.5,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<script>\"a\" & 'b'</script>"),
            "&lt;script&gt;&quot;a&quot; &amp; &#x27;b&#x27;&lt;/script&gt;"
        );
    }

    #[test]
    fn renders_verdict_and_range() {
        let view = StatusView {
            reading: Some(reading()),
            result: Ok(AnomalyPrediction {
                timestamp: "2024-06-01T14:00:00Z".into(),
                actual_aqi: 155.0,
                predicted_mean_aqi: 80.0,
                aqi_lower_bound: 60.0,
                aqi_upper_bound: 100.0,
                is_anomaly: true,
                deviation: 55.0,
            }),
        };
        let page = render_status_page(&view);
        assert!(page.contains("Anomaly detected"));
        assert!(page.contains("60.0 &ndash; 100.0"));
        assert!(page.contains("<td>55.0</td>"));
        assert!(page.contains("2024-06-01T14:00:00Z"));
    }

    #[test]
    fn renders_escaped_error_body() {
        let view = StatusView {
            reading: Some(reading()),
            result: Err(DashboardError::HttpStatus {
                status: 500,
                body: "<b>boom</b>".into(),
            }),
        };
        let page = render_status_page(&view);
        assert!(page.contains("http-status"));
        assert!(page.contains("HTTP 500"));
        assert!(page.contains("&lt;b&gt;boom&lt;/b&gt;"));
        assert!(!page.contains("<b>boom</b>"));
    }
}
