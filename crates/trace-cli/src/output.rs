//! Result formatting.

use crate::orchestrator::{RunResults, TraceSummary};
use crate::OutputFormat;
use anyhow::Result;
use std::io::Write;

const CSV_HEADER: &str = "codes,tmin,tmax,deltat,nsamples,mean,max_time,max_value";

fn opt(v: Option<f64>) -> String {
    v.map_or_else(String::new, |x| x.to_string())
}

fn csv_row(t: &TraceSummary) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        t.codes,
        t.tmin,
        t.tmax,
        t.deltat,
        t.nsamples,
        t.mean,
        opt(t.max_time),
        opt(t.max_value)
    )
}

/// Write the results of a run.
pub fn write_results(results: &RunResults, out: &mut impl Write, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "Run: {}", results.name)?;
            writeln!(out, "{}", "=".repeat(5 + results.name.len()))?;

            if !results.steps.is_empty() {
                writeln!(out)?;
                writeln!(out, "Steps:")?;
                for s in &results.steps {
                    writeln!(out, "  {:<22} {:>4} -> {:>4} traces", s.step, s.traces_in, s.traces_out)?;
                }
            }

            writeln!(out)?;
            writeln!(out, "Traces:")?;
            for t in &results.traces {
                write_trace_text(t, out)?;
            }

            if !results.correlations.is_empty() {
                writeln!(out)?;
                writeln!(out, "Correlations:")?;
                for c in &results.correlations {
                    writeln!(out, "  {} ~ {}: lag {:.6} s, value {:.6}", c.a, c.b, c.lag, c.value)?;
                }
            }

            if !results.peaks.is_empty() {
                writeln!(out)?;
                writeln!(out, "Peaks:")?;
                for p in &results.peaks {
                    writeln!(out, "  {}: {} peaks", p.codes, p.times.len())?;
                    for (t, a) in p.times.iter().zip(&p.amplitudes) {
                        writeln!(out, "    {:.6} s  {:.6}", t, a)?;
                    }
                }
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(results)?)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "{}", CSV_HEADER)?;
            for t in &results.traces {
                writeln!(out, "{}", csv_row(t))?;
            }
        }
    }
    Ok(())
}

fn write_trace_text(t: &TraceSummary, out: &mut impl Write) -> Result<()> {
    write!(
        out,
        "  {:<20} {:.6} .. {:.6} s  dt={} s  n={}  mean={:.6}",
        t.codes, t.tmin, t.tmax, t.deltat, t.nsamples, t.mean
    )?;
    if let (Some(time), Some(value)) = (t.max_time, t.max_value) {
        write!(out, "  max={:.6} at {:.6} s", value, time)?;
    }
    writeln!(out)?;
    Ok(())
}

/// Header line preceding a stream of [`write_trace`] records, if any.
pub fn write_trace_header(out: &mut impl Write, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Csv = format {
        writeln!(out, "{}", CSV_HEADER)?;
    }
    Ok(())
}

/// Write one trace as it completes.
pub fn write_trace(t: &TraceSummary, out: &mut impl Write, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => write_trace_text(t, out)?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(t)?)?,
        OutputFormat::Csv => writeln!(out, "{}", csv_row(t))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::StepReport;

    fn results() -> RunResults {
        RunResults {
            name: "demo".into(),
            steps: vec![StepReport {
                step: "degap",
                traces_in: 4,
                traces_out: 1,
            }],
            traces: vec![TraceSummary {
                codes: ".STA..Z".into(),
                tmin: 0.0,
                tmax: 9.0,
                deltat: 1.0,
                nsamples: 10,
                mean: 0.5,
                max_time: Some(3.0),
                max_value: Some(2.0),
            }],
            ..RunResults::default()
        }
    }

    #[test]
    fn test_text_output() {
        let mut buf = Vec::new();
        write_results(&results(), &mut buf, OutputFormat::Text).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Run: demo\n"));
        assert!(text.contains("degap"));
        assert!(text.contains(".STA..Z"));
        assert!(!text.contains("Correlations:"));
    }

    #[test]
    fn test_json_output() {
        let mut buf = Vec::new();
        write_results(&results(), &mut buf, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["traces"][0]["nsamples"], 10);
        assert_eq!(value["steps"][0]["traces_out"], 1);
    }

    #[test]
    fn test_csv_row() {
        let mut buf = Vec::new();
        write_trace(&results().traces[0], &mut buf, OutputFormat::Csv).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), ".STA..Z,0,9,1,10,0.5,3,2\n");
    }
}
