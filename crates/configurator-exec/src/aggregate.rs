//! Report assembly.
//!
//! Every execution result becomes exactly one report entry: the script's own
//! document when it succeeded and printed well-formed markup, a synthesized
//! error subtree otherwise.

use std::io::Write;

use configurator_core::{element_name, Document, Element, XmlError};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::warn;

use crate::runner::ExecutionResult;

/// Code carried by every synthesized error.
pub const ERROR_CODE: u32 = 999;

/// Message carried by every synthesized error.
pub const ERROR_MESSAGE: &str = "configurator script did not produce a usable report";

/// Root tag of a single-directory run when none is configured.
pub const DEFAULT_REPORT_TAG: &str = "reports";

/// Root tag of a multi-kind run.
pub const COMPOSITE_REPORT_TAG: &str = "configurators";

/// What a report entry contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportContent {
    /// Root element markup exactly as the script printed it.
    Verbatim(String),
    Synthesized(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub script: String,
    pub content: ReportContent,
}

impl ReportEntry {
    pub fn is_synthesized(&self) -> bool {
        matches!(self.content, ReportContent::Synthesized(_))
    }

    fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        match &self.content {
            ReportContent::Verbatim(markup) => writer
                .write_event(Event::Text(BytesText::from_escaped(markup.as_str())))
                .map_err(write_error),
            ReportContent::Synthesized(element) => element.write_to(writer),
        }
    }
}

/// Report of one script directory: a root element with one child per script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    root_tag: String,
    entries: Vec<ReportEntry>,
}

impl ReportDocument {
    pub fn new(root_tag: impl Into<String>) -> Self {
        Self {
            root_tag: root_tag.into(),
            entries: Vec::new(),
        }
    }

    pub fn root_tag(&self) -> &str {
        &self.root_tag
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that had to be synthesized.
    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_synthesized()).count()
    }

    pub fn passed_count(&self) -> usize {
        self.len() - self.failed_count()
    }

    /// Write the report element (no XML declaration).
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        writer
            .write_event(Event::Start(BytesStart::new(self.root_tag.as_str())))
            .map_err(write_error)?;
        for entry in &self.entries {
            entry.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.root_tag.as_str())))
            .map_err(write_error)
    }

    /// Write a complete document, declaration included.
    pub fn write<W: Write>(&self, out: W) -> Result<(), XmlError> {
        let mut writer = Writer::new(out);
        write_declaration(&mut writer)?;
        self.write_to(&mut writer)
    }

    /// The report element as a string, without declaration.
    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

/// Several per-kind reports wrapped in one root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeReport {
    reports: Vec<ReportDocument>,
}

impl CompositeReport {
    pub fn new(reports: Vec<ReportDocument>) -> Self {
        Self { reports }
    }

    pub fn reports(&self) -> &[ReportDocument] {
        &self.reports
    }

    pub fn script_count(&self) -> usize {
        self.reports.iter().map(ReportDocument::len).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.iter().map(ReportDocument::failed_count).sum()
    }

    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        writer
            .write_event(Event::Start(BytesStart::new(COMPOSITE_REPORT_TAG)))
            .map_err(write_error)?;
        for report in &self.reports {
            report.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(COMPOSITE_REPORT_TAG)))
            .map_err(write_error)
    }

    pub fn write<W: Write>(&self, out: W) -> Result<(), XmlError> {
        let mut writer = Writer::new(out);
        write_declaration(&mut writer)?;
        self.write_to(&mut writer)
    }

    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

/// Build the report for `results`, keeping their order.
pub fn aggregate(root_tag: &str, results: &[ExecutionResult]) -> ReportDocument {
    let mut report = ReportDocument::new(root_tag);
    for result in results {
        report.push(interpret(result));
    }
    report
}

/// Turn one execution result into a report entry.
pub fn interpret(result: &ExecutionResult) -> ReportEntry {
    let script = result.script.name.clone();

    if result.succeeded() && !result.stdout.trim().is_empty() {
        match Document::parse(result.stdout.as_str()) {
            Ok(document) => {
                return ReportEntry {
                    script,
                    content: ReportContent::Verbatim(document.root_markup().to_string()),
                };
            }
            Err(e) => warn!(script = %script, error = %e, "script output is not a valid report"),
        }
    } else {
        warn!(
            script = %script,
            exit_code = result.return_code,
            "script did not report successfully"
        );
    }

    ReportEntry {
        script,
        content: ReportContent::Synthesized(synthesize_error(result)),
    }
}

/// Canonical error subtree for a script that produced no usable report.
pub fn synthesize_error(result: &ExecutionResult) -> Element {
    let name = element_name(&result.script.name);
    let detail = format!(
        "Stdout = {}\nStderr = {}\nReturnCode = {}\n",
        result.stdout, result.stderr, result.return_code
    );

    let error = Element::new("error")
        .with_child(Element::new("code").with_text(ERROR_CODE.to_string()))
        .with_child(Element::new("detail").with_text(detail))
        .with_child(Element::new("message").with_text(ERROR_MESSAGE))
        .with_child(Element::new("success").with_text("false"));

    let inner = Element::new(name.as_str())
        .with_child(Element::new("errors").with_child(Element::new("error_list").with_child(error)))
        .with_child(Element::new("extensions"));

    Element::new(name).with_child(inner)
}

fn write_declaration<W: Write>(writer: &mut Writer<W>) -> Result<(), XmlError> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_error)?;
    writer
        .write_event(Event::Text(BytesText::from_escaped("\n")))
        .map_err(write_error)
}

fn write_error(err: impl std::fmt::Display) -> XmlError {
    XmlError::Write(err.to_string())
}
