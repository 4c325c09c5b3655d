//! xUnit v2 result reader.
//!
//! Reads `<test>` elements one at a time:
//!
//! ```xml
//! <assemblies>
//!   <assembly name="Tests.dll" total="2" failed="1">
//!     <collection>
//!       <test name="Ns.Tests.Foo(x: 1)" type="Ns.Tests" method="Foo" time="0.5" result="Pass">
//!         <output>console text</output>
//!       </test>
//!       <test name="Ns.Tests.Bar" type="Ns.Tests" method="Bar" time="0.1" result="Fail">
//!         <failure exception-type="Xunit.Sdk.TrueException">
//!           <message>Assert.True() Failure</message>
//!           <stack-trace>at Ns.Tests.Bar()</stack-trace>
//!         </failure>
//!       </test>
//!       <test name="Ns.Tests.Baz" type="Ns.Tests" method="Baz" time="0" result="Skip">
//!         <reason>not on this platform</reason>
//!       </test>
//!     </collection>
//!   </assembly>
//! </assemblies>
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::element::{Element, ElementStream};
use super::{Format, ReaderError, ReaderResult, parse_seconds};
use crate::model::{CONSOLE_OUTPUT, CanonicalResult, Outcome};

/// Streaming reader for xUnit v2 XML.
pub struct XUnitReader<R> {
    elements: ElementStream<R>,
}

impl XUnitReader<BufReader<File>> {
    pub fn open(path: &Path) -> ReaderResult<Self> {
        Ok(Self {
            elements: ElementStream::open(path)?,
        })
    }
}

impl<R: BufRead> XUnitReader<R> {
    pub fn from_reader(source: R) -> Self {
        Self {
            elements: ElementStream::from_reader(source),
        }
    }
}

impl<R: BufRead> Iterator for XUnitReader<R> {
    type Item = ReaderResult<CanonicalResult>;

    fn next(&mut self) -> Option<Self::Item> {
        self.elements
            .next_element(&["test"])
            .map(|element| element.and_then(|e| convert(&e)))
    }
}

fn convert(test: &Element) -> ReaderResult<CanonicalResult> {
    let name = test
        .attr("name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReaderError::Malformed("<test> without a name".to_string()))?;

    let raw_outcome = test.attr("result").ok_or_else(|| {
        ReaderError::Malformed(format!("test '{}' has no result attribute", name))
    })?;
    let outcome = Outcome::parse(raw_outcome).ok_or_else(|| ReaderError::UnmappedOutcome {
        test: name.to_string(),
        outcome: raw_outcome.to_string(),
    })?;

    let duration = parse_seconds(name, test.attr("time"))?;

    let mut result = CanonicalResult::new(name, Format::XUnit, outcome)
        .with_type_name(test.attr("type").unwrap_or_default())
        .with_method(test.attr("method").unwrap_or_default())
        .with_duration(duration);

    if let Some(failure) = test.child("failure") {
        if let Some(exception) = failure.attr("exception-type") {
            result = result.with_exception_type(exception);
        }
        if let Some(message) = failure.text_at(&["message"]) {
            result = result.with_failure_message(message);
        }
        if let Some(trace) = failure.content_at(&["stack-trace"]) {
            result = result.with_stack_trace(trace);
        }
    }

    if let Some(reason) = test.child("reason") {
        result = result.with_skip_reason(reason.scalar());
    }

    if let Some(output) = test.content_at(&["output"]) {
        result = result.with_attachment(CONSOLE_OUTPUT, output);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(xml: &str) -> Vec<ReaderResult<CanonicalResult>> {
        XUnitReader::from_reader(xml.as_bytes()).collect()
    }

    #[test]
    fn test_reads_pass_fail_skip() {
        let xml = r#"<assemblies><assembly name="a.dll" total="3" failed="1"><collection>
            <test name="Ns.T.Foo(1)" type="Ns.T" method="Foo" time="0.5" result="Pass"/>
            <test name="Ns.T.Bar" type="Ns.T" method="Bar" time="0.25" result="Fail">
              <failure exception-type="Xunit.Sdk.EqualException">
                <message>boom</message>
                <stack-trace>at Ns.T.Bar()</stack-trace>
              </failure>
            </test>
            <test name="Ns.T.Baz" type="Ns.T" method="Baz" time="0" result="Skip">
              <reason>later</reason>
            </test>
        </collection></assembly></assemblies>"#;

        let results: Vec<_> = read_all(xml).into_iter().map(Result::unwrap).collect();
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].name, "Ns.T.Foo(1)");
        assert_eq!(results[0].outcome, Outcome::Pass);
        assert_eq!(results[0].type_name, "Ns.T");
        assert_eq!(results[0].method, "Foo");
        assert_eq!(results[0].duration_seconds, 0.5);

        assert_eq!(results[1].outcome, Outcome::Fail);
        assert_eq!(
            results[1].exception_type.as_deref(),
            Some("Xunit.Sdk.EqualException")
        );
        assert_eq!(results[1].failure_message.as_deref(), Some("boom"));
        assert_eq!(results[1].stack_trace.as_deref(), Some("at Ns.T.Bar()"));

        assert_eq!(results[2].outcome, Outcome::Skip);
        assert_eq!(results[2].skip_reason.as_deref(), Some("later"));
    }

    #[test]
    fn test_output_becomes_console_attachment() {
        let xml = r#"<assemblies><test name="T" result="Pass" time="1"><output><![CDATA[hello
world]]></output></test></assemblies>"#;
        let result = read_all(xml).pop().unwrap().unwrap();
        assert_eq!(result.attachments.len(), 1);
        assert_eq!(result.attachments[0].name, CONSOLE_OUTPUT);
        assert_eq!(result.attachments[0].text, "hello\nworld");
    }

    #[test]
    fn test_output_keeps_indentation() {
        let xml = "<assemblies><test name=\"T\" result=\"Fail\" time=\"1\">\n  <failure>\n    <message>\n      boom\n    </message>\n    <stack-trace>   at A()\n   at B()</stack-trace>\n  </failure>\n  <output>step 1\n    nested\n</output>\n</test></assemblies>";
        let result = read_all(xml).pop().unwrap().unwrap();
        assert_eq!(result.failure_message.as_deref(), Some("boom"));
        assert_eq!(result.stack_trace.as_deref(), Some("   at A()\n   at B()"));
        assert_eq!(result.attachments[0].text, "step 1\n    nested\n");
    }

    #[test]
    fn test_unmapped_outcome_does_not_stop_stream() {
        let xml = r#"<assemblies>
            <test name="A" result="NotRun" time="0"/>
            <test name="B" result="Pass" time="0"/>
        </assemblies>"#;
        let items = read_all(xml);
        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[0],
            Err(ReaderError::UnmappedOutcome { test, outcome }) if test == "A" && outcome == "NotRun"
        ));
        assert_eq!(items[1].as_ref().unwrap().name, "B");
    }

    #[test]
    fn test_malformed_record_is_skippable() {
        let xml = r#"<assemblies>
            <test result="Pass" time="0"/>
            <test name="B" result="Pass" time="soon"/>
            <test name="C" result="Pass"/>
        </assemblies>"#;
        let items = read_all(xml);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(ReaderError::Malformed(_))));
        assert!(matches!(items[1], Err(ReaderError::Malformed(_))));
        let c = items[2].as_ref().unwrap();
        assert_eq!(c.name, "C");
        assert_eq!(c.duration_seconds, 0.0);
    }
}
