//! Element-at-a-time XML reading.
//!
//! [`ElementStream`] scans a document with `quick-xml` and materializes only
//! the subtree of each element the caller asks for. The subtree is handed
//! out as an owned [`Element`] and dropped by the caller once converted, so
//! memory use is bounded by the largest single record rather than the file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{ReaderError, ReaderResult};

/// An owned XML element with its attributes, text, and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    /// Concatenated text and CDATA directly inside this element, whitespace
    /// included.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> ReaderResult<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    /// Returns the value of attribute `key`, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follows a path of direct-child names, e.g. `["Output", "ErrorInfo"]`.
    pub fn descend(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// This element's text with surrounding whitespace removed.
    pub fn scalar(&self) -> &str {
        self.text.trim()
    }

    /// Trimmed text of the element at `path`, if it exists and is not blank.
    /// For single values such as messages and reasons.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.descend(path)
            .map(Element::scalar)
            .filter(|t| !t.is_empty())
    }

    /// Untrimmed text of the element at `path`, if it exists and is not
    /// blank. For console output and stack traces, where indentation matters.
    pub fn content_at(&self, path: &[&str]) -> Option<&str> {
        self.descend(path)
            .map(|e| e.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Streams selected elements out of an XML document.
pub struct ElementStream<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl ElementStream<BufReader<File>> {
    /// Opens `path` for streaming.
    pub fn open(path: &Path) -> ReaderResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ElementStream<R> {
    pub fn from_reader(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        Self {
            reader,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Advances to the next element whose local name is in `names` and
    /// returns its complete subtree.
    ///
    /// Returns `None` at end of document. After an `Err` the stream is
    /// finished; XML syntax errors are not recoverable.
    pub fn next_element(&mut self, names: &[&str]) -> Option<ReaderResult<Element>> {
        while !self.done {
            self.buf.clear();
            let found = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) if is_wanted(&e, names) => {
                    Some(Element::from_start(&e).map(|el| (el, true)))
                }
                Ok(Event::Empty(e)) if is_wanted(&e, names) => {
                    Some(Element::from_start(&e).map(|el| (el, false)))
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    None
                }
                Ok(_) => None,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };

            match found {
                Some(Ok((root, true))) => {
                    let subtree = self.read_subtree(root);
                    if subtree.is_err() {
                        self.done = true;
                    }
                    return Some(subtree);
                }
                Some(Ok((root, false))) => return Some(Ok(root)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {}
            }
        }
        None
    }

    /// Reads everything up to the end tag matching `root`.
    fn read_subtree(&mut self, root: Element) -> ReaderResult<Element> {
        let mut stack = vec![root];
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => stack.push(Element::from_start(&e)?),
                Event::Empty(e) => {
                    let child = Element::from_start(&e)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(child);
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    let raw = c.into_inner();
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&raw));
                    }
                }
                Event::End(_) => {
                    if let Some(done) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(done),
                            None => return Ok(done),
                        }
                    }
                }
                Event::Eof => {
                    let open = stack.first().map(|e| e.name.clone()).unwrap_or_default();
                    return Err(ReaderError::Malformed(format!(
                        "document ended inside <{}>",
                        open
                    )));
                }
                _ => {}
            }
        }
    }
}

fn is_wanted(start: &BytesStart<'_>, names: &[&str]) -> bool {
    let local = start.local_name();
    names.iter().any(|n| n.as_bytes() == local.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(xml: &str) -> ElementStream<&[u8]> {
        ElementStream::from_reader(xml.as_bytes())
    }

    #[test]
    fn test_yields_only_requested_elements() {
        let mut s = stream(
            r#"<root><skip a="1"/><item id="1"><v>one</v></item><item id="2"/></root>"#,
        );
        let first = s.next_element(&["item"]).unwrap().unwrap();
        assert_eq!(first.attr("id"), Some("1"));
        assert_eq!(first.text_at(&["v"]), Some("one"));

        let second = s.next_element(&["item"]).unwrap().unwrap();
        assert_eq!(second.attr("id"), Some("2"));
        assert!(second.children.is_empty());

        assert!(s.next_element(&["item"]).is_none());
    }

    #[test]
    fn test_nested_text_and_cdata() {
        let mut s = stream(
            "<a><b><c>x &amp; y</c></b><d><![CDATA[<raw>]]></d></a>",
        );
        let a = s.next_element(&["a"]).unwrap().unwrap();
        assert_eq!(a.text_at(&["b", "c"]), Some("x & y"));
        assert_eq!(a.text_at(&["d"]), Some("<raw>"));
        assert_eq!(a.text_at(&["missing"]), None);
    }

    #[test]
    fn test_content_keeps_indentation() {
        let mut s = stream("<t>\n  <out>  line 1\n    line 2\n</out>\n  <msg>\n  boom \n</msg>\n  <blank>  </blank>\n</t>");
        let t = s.next_element(&["t"]).unwrap().unwrap();
        assert_eq!(t.content_at(&["out"]), Some("  line 1\n    line 2\n"));
        assert_eq!(t.text_at(&["out"]), Some("line 1\n    line 2"));
        assert_eq!(t.text_at(&["msg"]), Some("boom"));
        assert_eq!(t.content_at(&["blank"]), None);
        assert_eq!(t.text_at(&["blank"]), None);
        assert_eq!(t.children.len(), 3);
    }

    #[test]
    fn test_attribute_values_are_unescaped() {
        let mut s = stream(r#"<t name="Foo(&quot;x&quot;)"/>"#);
        let t = s.next_element(&["t"]).unwrap().unwrap();
        assert_eq!(t.attr("name"), Some("Foo(\"x\")"));
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let mut s = stream("<root><item><v>1</v>");
        let err = s.next_element(&["item"]).unwrap();
        assert!(err.is_err());
        assert!(s.next_element(&["item"]).is_none());
    }
}
