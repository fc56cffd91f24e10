//! HED annotation tag-group parsing
//!
//! A HED annotation is a comma-separated list of tags where parentheses
//! group tags that belong together, e.g. `A,(B,C),(D,(E,F))`. Parsing
//! flattens it into top-level groups of [`TagGroupMember`]s. Nesting is not
//! kept as a tree: consumers rebuild it from `has_pairing` and
//! `additional_members` alone, so those two fields must be exact.
//!
//! **Algorithm:**
//! 1. Split on `,` and walk the elements from last to first, tracking how many
//!    parentheses are open to the right of the current element
//! 2. A new top-level group starts whenever that depth returns to zero
//! 3. Each element resolves its tag by the last `/` segment of the tag path
//! 4. An element opening more than one parenthesis emits one tag-less
//!    member per extra level
//! 5. Openers count the members still pending in the group they open by
//!    looking ahead to the matching closer
//!
//! Groups and their members are returned in reading order.

use crate::error::{ImportError, ImportResult};
use std::collections::HashMap;

/// One member of a parsed tag group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGroupMember {
    /// Resolved tag id; `None` for a pure grouping parenthesis
    pub tag_id: Option<i64>,
    /// Member belongs to a parenthesized group
    pub has_pairing: bool,
    /// Members still to come in the group this member opens
    pub additional_members: usize,
    /// Literal tag path as written
    pub value: Option<String>,
}

/// A top-level tag group
pub type TagGroup = Vec<TagGroupMember>;

/// HED tag vocabulary keyed by leaf tag name
#[derive(Debug, Clone, Default)]
pub struct HedVocabulary {
    by_name: HashMap<String, i64>,
}

impl HedVocabulary {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            by_name: tags.into_iter().map(|(name, id)| (name.into(), id)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Resolve a tag path by its last segment
    ///
    /// Values and definitions (`Def/Name`, `Duration/2 s`) are not supported
    /// and fail like any other unknown tag.
    pub fn resolve(&self, tag_path: &str) -> ImportResult<i64> {
        let leaf = tag_path.rsplit('/').next().unwrap_or(tag_path).trim();
        self.by_name
            .get(leaf)
            .copied()
            .ok_or_else(|| ImportError::UnrecognizedTag(tag_path.to_string()))
    }
}

#[derive(Debug)]
struct Element<'a> {
    raw: &'a str,
    tag: &'a str,
    opens: usize,
    closes: usize,
}

impl<'a> Element<'a> {
    fn new(raw: &'a str) -> Self {
        let raw = raw.trim();
        let right_stripped = raw.trim_end_matches(')');
        let tag = right_stripped.trim_start_matches('(');
        Self {
            raw,
            tag,
            opens: right_stripped.len() - tag.len(),
            closes: raw.len() - right_stripped.len(),
        }
    }

    fn is_opener(&self) -> bool {
        self.raw.starts_with('(')
    }

    fn is_closer(&self) -> bool {
        self.raw.ends_with(')')
    }
}

/// Parse a HED annotation string into tag groups
pub fn parse_tag_groups(annotation: &str, vocabulary: &HedVocabulary) -> ImportResult<Vec<TagGroup>> {
    if annotation.trim().is_empty() {
        return Ok(Vec::new());
    }

    let elements: Vec<Element> = annotation.split(',').map(Element::new).collect();
    let count = elements.len();

    let mut depth: usize = 0;
    let mut groups: Vec<TagGroup> = Vec::new();
    let mut group: TagGroup = Vec::new();

    for (reverse_index, element) in elements.iter().rev().enumerate() {
        let forward_index = count - 1 - reverse_index;

        if depth == 0 && !group.is_empty() {
            groups.push(std::mem::take(&mut group));
        }

        let opens_pairing = element.is_opener() && (depth == 0 || !element.is_closer());
        let inside_group = depth + element.closes > 0;

        let additional_members = if opens_pairing {
            pending_members(&elements, forward_index, 1)
        } else {
            0
        };

        let tag_id = vocabulary.resolve(element.tag)?;
        group.push(TagGroupMember {
            tag_id: Some(tag_id),
            has_pairing: opens_pairing || inside_group,
            additional_members,
            value: Some(element.tag.to_string()),
        });

        // A self-closed `(X)` inside an enclosing group still needs a grouping
        // member for its own parenthesis
        let first_level = if depth > 0 && element.is_opener() && element.is_closer() {
            0
        } else {
            1
        };
        for level in first_level..element.opens {
            group.push(TagGroupMember {
                tag_id: None,
                has_pairing: true,
                additional_members: pending_members(&elements, forward_index, level + 1),
                value: None,
            });
        }

        depth += element.closes;
        depth = depth.checked_sub(element.opens).ok_or_else(|| {
            ImportError::invalid_data("HED annotation", format!("unbalanced parentheses in '{}'", annotation))
        })?;
    }

    if depth != 0 {
        return Err(ImportError::invalid_data(
            "HED annotation",
            format!("unbalanced parentheses in '{}'", annotation),
        ));
    }

    if !group.is_empty() {
        groups.push(group);
    }

    // Built back to front; groups and members are returned in reading order
    for group in groups.iter_mut() {
        group.reverse();
    }
    groups.reverse();

    Ok(groups)
}

/// Count members after `start` that belong directly to the group opened by
/// the `paren_level`-th innermost parenthesis of that element
fn pending_members(elements: &[Element], start: usize, paren_level: usize) -> usize {
    let mut level = paren_level as isize - elements[start].closes as isize;
    let mut pending = 0;

    for element in &elements[start + 1..] {
        if level <= 0 {
            break;
        }
        if level == 1 {
            pending += 1;
        }
        level += element.opens as isize;
        level -= element.closes as isize;
    }

    pending
}
