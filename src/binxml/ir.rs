//! Arena-backed element tree for decoded template fragments.
//!
//! Elements live in a flat `Vec` and refer to their children by [`ElementId`], so the tree never
//! holds references into itself and can be walked without recursion.

use super::name::BinXmlName;
use super::tokens::FragmentHeader;

/// Index of an element inside [`BinXmlFragment`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A numbered slot filled in at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substitution {
    pub index: u16,
    /// Declared BinXML value type of the slot.
    pub value_type: u8,
    /// `true` for optional substitutions (token `0x0e`).
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Element(ElementId),
    Text(String),
    Substitution(Substitution),
    CharRef(u16),
    EntityRef(BinXmlName),
}

/// Attribute values never contain [`Content::Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: BinXmlName,
    pub value: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    pub name: BinXmlName,
    pub dependency_id: u16,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Content>,
}

impl ElementNode {
    pub(crate) fn new(name: BinXmlName, dependency_id: u16) -> Self {
        ElementNode {
            name,
            dependency_id,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// A decoded BinXML fragment: header, element arena and (optional) root.
///
/// A zero-length fragment decodes to a tree without a root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BinXmlFragment {
    pub(crate) header: Option<FragmentHeader>,
    pub(crate) elements: Vec<ElementNode>,
    pub(crate) root: Option<ElementId>,
    pub(crate) consumed: usize,
}

impl BinXmlFragment {
    pub fn header(&self) -> Option<&FragmentHeader> {
        self.header.as_ref()
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn root_element(&self) -> Option<&ElementNode> {
        self.root.and_then(|id| self.element(id))
    }

    pub fn element(&self, id: ElementId) -> Option<&ElementNode> {
        self.elements.get(id.0)
    }

    pub fn elements(&self) -> &[ElementNode] {
        &self.elements
    }

    /// Number of bytes up to and including the end of stream token.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Every substitution in document order (attribute values before children).
    pub fn substitutions(&self) -> Vec<Substitution> {
        enum Visit<'a> {
            Element(ElementId),
            Content(&'a Content),
        }

        let mut out = Vec::new();
        let mut stack: Vec<Visit<'_>> = self.root.map(Visit::Element).into_iter().collect();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Element(id) => {
                    let Some(element) = self.element(id) else {
                        continue;
                    };
                    for content in element.attributes.iter().flat_map(|a| a.value.iter()) {
                        if let Content::Substitution(sub) = content {
                            out.push(*sub);
                        }
                    }
                    stack.extend(element.children.iter().rev().map(Visit::Content));
                }
                Visit::Content(Content::Element(id)) => stack.push(Visit::Element(*id)),
                Visit::Content(Content::Substitution(sub)) => out.push(*sub),
                Visit::Content(_) => {}
            }
        }
        out
    }
}
