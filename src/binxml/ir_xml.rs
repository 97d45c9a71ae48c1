//! XML rendering for decoded template fragments.
//!
//! Rendering rules:
//! - Every element emits an explicit close tag, even when empty (no `<X/>`).
//! - Text and attribute values are XML-escaped.
//! - Entity references are preserved as `&name;`, character references as `&#N;`.
//! - Substitutions render as `{sub:N}` placeholders, `{sub:N:Name}` when item names are known,
//!   or as the caller-supplied value for slot `N`.
//!
//! The traversal is driven by an explicit work stack, so deeply nested input cannot exhaust the
//! call stack.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt::Write;

use quick_xml::escape::{escape, partial_escape};

use super::error::{BinXmlError, Result};
use super::ir::{BinXmlFragment, Content, ElementId, Substitution};
use super::value::SubstitutionValue;

enum Step<'a> {
    Open(ElementId),
    Close(ElementId),
    Content(&'a Content),
}

impl BinXmlFragment {
    /// Render with `{sub:N}` placeholders.
    pub fn to_xml(&self) -> String {
        let rendered = self.write_xml(|sub: &Substitution| {
            Ok::<_, Infallible>(Cow::Owned(format!("{{sub:{}}}", sub.index)))
        });
        match rendered {
            Ok(xml) => xml,
            Err(never) => match never {},
        }
    }

    /// Render with `{sub:N:Name}` placeholders where `names[N]` is known.
    pub fn to_xml_with_names(&self, names: &[Option<String>]) -> String {
        let rendered = self.write_xml(|sub: &Substitution| {
            let idx = usize::from(sub.index);
            let placeholder = match names.get(idx).and_then(|n| n.as_deref()) {
                Some(name) => format!("{{sub:{idx}:{name}}}"),
                None => format!("{{sub:{idx}}}"),
            };
            Ok::<_, Infallible>(Cow::Owned(placeholder))
        });
        match rendered {
            Ok(xml) => xml,
            Err(never) => match never {},
        }
    }

    /// Render with every substitution replaced by `values[N]`.
    ///
    /// Referencing a slot past the end of `values` is an error, never an empty string.
    pub fn render_with_values(&self, values: &[SubstitutionValue]) -> Result<String> {
        self.write_xml(|sub: &Substitution| {
            values
                .get(usize::from(sub.index))
                .map(SubstitutionValue::as_text)
                .ok_or(BinXmlError::MissingSubstitution {
                    index: sub.index,
                    provided: values.len(),
                })
        })
    }

    fn write_xml<'v, E, F>(&self, mut resolve: F) -> std::result::Result<String, E>
    where
        F: FnMut(&Substitution) -> std::result::Result<Cow<'v, str>, E>,
    {
        let mut out = String::new();
        let mut steps: Vec<Step<'_>> = self.root.map(Step::Open).into_iter().collect();

        while let Some(step) = steps.pop() {
            match step {
                Step::Open(id) => {
                    let Some(element) = self.element(id) else {
                        continue;
                    };
                    out.push('<');
                    out.push_str(element.name.as_str());
                    for attribute in &element.attributes {
                        out.push(' ');
                        out.push_str(attribute.name.as_str());
                        out.push_str("=\"");
                        for part in &attribute.value {
                            write_content(&mut out, part, true, &mut resolve)?;
                        }
                        out.push('"');
                    }
                    out.push('>');

                    steps.push(Step::Close(id));
                    steps.extend(element.children.iter().rev().map(Step::Content));
                }
                Step::Close(id) => {
                    if let Some(element) = self.element(id) {
                        out.push_str("</");
                        out.push_str(element.name.as_str());
                        out.push('>');
                    }
                }
                Step::Content(Content::Element(child)) => steps.push(Step::Open(*child)),
                Step::Content(content) => write_content(&mut out, content, false, &mut resolve)?,
            }
        }

        Ok(out)
    }
}

fn write_content<'v, E, F>(
    out: &mut String,
    content: &Content,
    in_attribute: bool,
    resolve: &mut F,
) -> std::result::Result<(), E>
where
    F: FnMut(&Substitution) -> std::result::Result<Cow<'v, str>, E>,
{
    let escaped = |text: &str| -> String {
        if in_attribute {
            escape(text).into_owned()
        } else {
            partial_escape(text).into_owned()
        }
    };

    match content {
        // Elements are scheduled by the caller.
        Content::Element(_) => {}
        Content::Text(text) => out.push_str(&escaped(text)),
        Content::Substitution(sub) => {
            let text = resolve(sub)?;
            out.push_str(&escaped(&text));
        }
        Content::CharRef(value) => {
            let _ = write!(out, "&#{value};");
        }
        Content::EntityRef(name) => {
            let _ = write!(out, "&{name};");
        }
    }
    Ok(())
}
