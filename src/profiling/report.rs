//! Profile reports: the nested XML-like log and a JSON summary.
//!
//! Both render from the same serializable tree:
//!
//! ```text
//! <PROFILE name="sort" trials="5" averaged="4">
//!   <TRIAL serial="1">
//!     <ATTR name="Time[ns]" value="2000000000" stddev="1200"/>
//!     <STEP serial="0" name="copy">
//!       <ATTR name="Device" value="0"/>
//!     </STEP>
//!   </TRIAL>
//! </PROFILE>
//! ```
//!
//! Zero-valued attributes are skipped, except `Device`.

use std::io::Write;

use serde::Serialize;

use crate::error::ProfileResult;
use crate::profiling::attributes::{Attribute, AttributeTable};
use crate::profiling::trial::{Step, Trial};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttrReport {
    pub name: &'static str,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub serial: usize,
    pub name: String,
    pub attributes: Vec<AttrReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialReport {
    pub serial: usize,
    pub attributes: Vec<AttrReport>,
    pub steps: Vec<StepReport>,
}

/// One rendered profile: a name and the trials chosen for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileReport {
    pub name: String,
    pub trials: usize,
    pub averaged: usize,
    pub entries: Vec<TrialReport>,
}

fn attr_reports(table: &AttributeTable) -> Vec<AttrReport> {
    table
        .iter()
        .filter(|&(attr, value, _)| value != 0.0 || attr == Attribute::Device)
        .map(|(attr, value, stddev)| AttrReport {
            name: attr.name(),
            value,
            stddev,
        })
        .collect()
}

impl From<&Step> for StepReport {
    fn from(step: &Step) -> Self {
        Self {
            serial: step.serial(),
            name: step.name().to_string(),
            attributes: attr_reports(step.attributes()),
        }
    }
}

impl From<&Trial> for TrialReport {
    fn from(trial: &Trial) -> Self {
        Self {
            serial: trial.serial(),
            attributes: attr_reports(trial.attributes()),
            steps: trial.steps().iter().map(StepReport::from).collect(),
        }
    }
}

impl ProfileReport {
    pub fn new<'a>(
        name: &str,
        trials: usize,
        averaged: usize,
        entries: impl IntoIterator<Item = &'a Trial>,
    ) -> Self {
        Self {
            name: name.to_string(),
            trials,
            averaged,
            entries: entries.into_iter().map(TrialReport::from).collect(),
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> ProfileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render the nested `PROFILE/TRIAL/STEP/ATTR` text form.
    pub fn write_xml<W: Write>(&self, w: &mut W) -> ProfileResult<()> {
        writeln!(
            w,
            "<PROFILE name=\"{}\" trials=\"{}\" averaged=\"{}\">",
            escape(&self.name),
            self.trials,
            self.averaged
        )?;
        for trial in &self.entries {
            writeln!(w, "  <TRIAL serial=\"{}\">", trial.serial)?;
            write_attrs(w, &trial.attributes, 4)?;
            for step in &trial.steps {
                writeln!(
                    w,
                    "    <STEP serial=\"{}\" name=\"{}\">",
                    step.serial,
                    escape(&step.name)
                )?;
                write_attrs(w, &step.attributes, 6)?;
                writeln!(w, "    </STEP>")?;
            }
            writeln!(w, "  </TRIAL>")?;
        }
        writeln!(w, "</PROFILE>")?;
        Ok(())
    }
}

fn write_attrs<W: Write>(w: &mut W, attrs: &[AttrReport], indent: usize) -> ProfileResult<()> {
    for attr in attrs {
        write!(
            w,
            "{:indent$}<ATTR name=\"{}\" value=\"{}\"",
            "",
            escape(attr.name),
            attr.value
        )?;
        if let Some(stddev) = attr.stddev {
            write!(w, " stddev=\"{stddev}\"")?;
        }
        writeln!(w, "/>")?;
    }
    Ok(())
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trial() -> Trial {
        let mut trial = Trial::new(2);
        let step = trial.push_step();
        step.set_name("copy <in>");
        step.set(Attribute::StartTime, 10.0);
        step.set(Attribute::StopTime, 110.0);
        step.set(Attribute::Memory, 400.0);
        trial.finalize();
        trial
    }

    #[test]
    fn test_zero_attrs_skipped_but_device_kept() {
        let report = TrialReport::from(&sample_trial());
        let names: Vec<_> = report.steps[0].attributes.iter().map(|a| a.name).collect();
        assert!(names.contains(&"Device"));
        assert!(names.contains(&"Time[ns]"));
        assert!(!names.contains(&"#Flops"));
        assert!(!names.contains(&"Flops/s"));
        // Step 0 has id 0.
        assert!(!names.contains(&"ID"));
    }

    #[test]
    fn test_xml_nesting() {
        let trial = sample_trial();
        let report = ProfileReport::new("copy & sort", 1, 1, [&trial]);
        let mut out = Vec::new();
        report.write_xml(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("<PROFILE name=\"copy &amp; sort\" trials=\"1\" averaged=\"1\">"));
        assert!(text.contains("  <TRIAL serial=\"2\">\n"));
        assert!(text.contains("    <STEP serial=\"0\" name=\"copy &lt;in&gt;\">\n"));
        assert!(text.contains("      <ATTR name=\"Time[ns]\" value=\"100\"/>\n"));
        assert!(text.contains("<ATTR name=\"Bandwidth[bytes/s]\" value=\"4000000000\"/>"));
        assert!(text.trim_end().ends_with("</PROFILE>"));
        assert!(!text.contains("stddev"));
    }

    #[test]
    fn test_json_carries_stddev_only_when_set() {
        let mut trial = sample_trial();
        trial.attributes_mut().set_std_dev(Attribute::Time, Some(5.0));
        let json = ProfileReport::new("p", 1, 1, [&trial]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let attrs = value["entries"][0]["attributes"].as_array().unwrap();
        let time = attrs.iter().find(|a| a["name"] == "Time[ns]").unwrap();
        assert_eq!(time["stddev"], 5.0);
        let memory = attrs.iter().find(|a| a["name"] == "MemoryAccesses[bytes]").unwrap();
        assert!(memory.get("stddev").is_none());
    }
}
