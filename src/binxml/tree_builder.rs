//! Builds the element arena from a BinXML token stream.
//!
//! The builder keeps an explicit stack of open elements. A start tag is accumulated in a
//! [`PendingElement`] until CloseStartElement/CloseEmptyElement materializes it; attributes and
//! their values are collected there. Any token that does not fit the current state is an error:
//! there is no resynchronization point in the format, so nothing is skipped.

use log::trace;

use super::error::{BinXmlError, Result};
use super::ir::{Attribute, BinXmlFragment, Content, ElementId, ElementNode};
use super::name::BinXmlName;
use super::tokens::{BinXmlToken, read_fragment_header, read_token};
use crate::utils::ByteCursor;

/// Decode a BinXML fragment (stream header + tokens + end of stream).
///
/// Bytes following the end of stream token are not inspected. A zero-length input is a valid,
/// empty fragment.
pub fn parse_fragment(data: &[u8]) -> Result<BinXmlFragment> {
    if data.is_empty() {
        return Ok(BinXmlFragment::default());
    }

    let mut cursor = ByteCursor::new(data);
    let header = read_fragment_header(&mut cursor)?;
    let mut builder = TreeBuilder::default();

    loop {
        if cursor.is_empty() {
            return Err(BinXmlError::MissingEndOfStream {
                offset: cursor.pos(),
            });
        }

        let offset = cursor.pos();
        let token = read_token(&mut cursor)?;
        if builder.push(token, offset)? {
            break;
        }
    }

    trace!(
        "decoded fragment: {} element(s), {} byte(s)",
        builder.elements.len(),
        cursor.pos()
    );

    Ok(BinXmlFragment {
        header: Some(header),
        elements: builder.elements,
        root: builder.root,
        consumed: cursor.pos(),
    })
}

#[derive(Default)]
struct TreeBuilder {
    elements: Vec<ElementNode>,
    stack: Vec<ElementId>,
    pending: Option<PendingElement>,
    root: Option<ElementId>,
}

impl TreeBuilder {
    /// Apply one token. Returns `true` once the end of stream has been reached.
    fn push(&mut self, token: BinXmlToken, offset: usize) -> Result<bool> {
        let what = token.describe();
        match token {
            BinXmlToken::EndOfStream => {
                if self.pending.is_some() {
                    return Err(unexpected(what, offset, "start tag was never closed"));
                }
                if !self.stack.is_empty() {
                    return Err(BinXmlError::UnbalancedElements {
                        offset,
                        open: self.stack.len(),
                    });
                }
                return Ok(true);
            }
            BinXmlToken::OpenStartElement {
                dependency_id,
                name,
                ..
            } => {
                if self.pending.is_some() {
                    return Err(unexpected(what, offset, "previous start tag was never closed"));
                }
                if self.stack.is_empty() && self.root.is_some() {
                    return Err(BinXmlError::MultipleRootElements { offset });
                }
                self.pending = Some(PendingElement::new(name, dependency_id));
            }
            BinXmlToken::Attribute(name) => {
                let pending = self
                    .pending
                    .as_mut()
                    .ok_or_else(|| unexpected(what, offset, "attribute outside of a start tag"))?;
                pending.start_attribute(name);
            }
            BinXmlToken::CloseStartElement => {
                let id = self.materialize(what, offset)?;
                self.stack.push(id);
            }
            BinXmlToken::CloseEmptyElement => {
                self.materialize(what, offset)?;
            }
            BinXmlToken::EndElement => {
                if self.pending.is_some() {
                    return Err(unexpected(what, offset, "start tag was never closed"));
                }
                self.stack
                    .pop()
                    .ok_or_else(|| unexpected(what, offset, "no element is open"))?;
            }
            BinXmlToken::Value(text) => self.push_content(Content::Text(text), what, offset)?,
            BinXmlToken::CharRef(value) => {
                self.push_content(Content::CharRef(value), what, offset)?
            }
            BinXmlToken::EntityRef(name) => {
                self.push_content(Content::EntityRef(name), what, offset)?
            }
            BinXmlToken::Substitution {
                index,
                value_type,
                optional,
            } => self.push_content(
                Content::Substitution(super::ir::Substitution {
                    index,
                    value_type,
                    optional,
                }),
                what,
                offset,
            )?,
        }
        Ok(false)
    }

    /// Close the pending start tag, allocate it and link it to its parent (or make it the root).
    fn materialize(&mut self, what: &'static str, offset: usize) -> Result<ElementId> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| unexpected(what, offset, "no start tag is open"))?;

        let id = ElementId(self.elements.len());
        self.elements.push(pending.finish());

        match self.stack.last() {
            Some(parent) => self.elements[parent.0].children.push(Content::Element(id)),
            None if self.root.is_none() => self.root = Some(id),
            None => return Err(BinXmlError::MultipleRootElements { offset }),
        }
        Ok(id)
    }

    fn push_content(&mut self, content: Content, what: &'static str, offset: usize) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            return pending
                .push_attribute_value(content)
                .ok_or_else(|| unexpected(what, offset, "start tag content before any attribute"));
        }

        let parent = self
            .stack
            .last()
            .copied()
            .ok_or_else(|| unexpected(what, offset, "content outside of any element"))?;
        self.elements[parent.0].children.push(content);
        Ok(())
    }
}

fn unexpected(token: &'static str, offset: usize, reason: &'static str) -> BinXmlError {
    BinXmlError::UnexpectedToken {
        token,
        offset,
        reason,
    }
}

/// A start tag whose attributes are still being read.
struct PendingElement {
    element: ElementNode,
    current: Option<Attribute>,
}

impl PendingElement {
    fn new(name: BinXmlName, dependency_id: u16) -> Self {
        PendingElement {
            element: ElementNode::new(name, dependency_id),
            current: None,
        }
    }

    fn start_attribute(&mut self, name: BinXmlName) {
        if let Some(done) = self.current.take() {
            self.element.attributes.push(done);
        }
        self.current = Some(Attribute {
            name,
            value: Vec::new(),
        });
    }

    fn push_attribute_value(&mut self, content: Content) -> Option<()> {
        self.current.as_mut()?.value.push(content);
        Some(())
    }

    fn finish(mut self) -> ElementNode {
        if let Some(done) = self.current.take() {
            self.element.attributes.push(done);
        }
        self.element
    }
}
