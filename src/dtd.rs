//! Flat DTD reading and writing.
//!
//! A flat DTD declares one element per table and one attribute per column:
//!
//! ```text
//! <!ELEMENT dataset (USERS*, ORDERS*)>
//! <!ELEMENT USERS EMPTY>
//! <!ATTLIST USERS
//!     ID CDATA #REQUIRED
//!     NAME CDATA #IMPLIED>
//! ```
//!
//! Table order follows the root element's content model; tables declared
//! outside it follow in declaration order. Column order is attribute
//! declaration order.

use std::fmt::Write as _;

use log::debug;

use crate::{
    error::{FixtureError, Result},
    model::{CaseSensitivity, Column, ColumnType, TableSchema},
};

pub const DEFAULT_ROOT_ELEMENT: &str = "dataset";

/// Parsed `<!DOCTYPE ...>` header of a flat document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocType {
    pub root: String,
    pub system_id: Option<String>,
    pub internal_subset: Option<String>,
}

/// Parses the content of a DOCTYPE declaration (everything between
/// `<!DOCTYPE` and the closing `>`).
pub fn parse_doctype(content: &str) -> Result<DocType> {
    let content = content.trim();
    let (head, internal_subset) = match content.find('[') {
        Some(start) => {
            let end = content.rfind(']').ok_or_else(|| {
                FixtureError::malformed("DOCTYPE internal subset is not closed with ']'")
            })?;
            if end < start {
                return Err(FixtureError::malformed("DOCTYPE internal subset is malformed"));
            }
            (&content[..start], Some(content[start + 1..end].to_string()))
        }
        None => (content, None),
    };
    let tokens = tokenize(head)?;
    let mut iter = tokens.into_iter();
    let root = match iter.next() {
        Some(Token::Word(word)) => word,
        _ => return Err(FixtureError::malformed("DOCTYPE is missing its root element name")),
    };
    let system_id = match iter.next() {
        Some(Token::Word(keyword)) if keyword == "SYSTEM" => match iter.next() {
            Some(Token::Quoted(id)) => Some(id),
            _ => None,
        },
        Some(Token::Word(keyword)) if keyword == "PUBLIC" => {
            let _public_id = iter.next();
            match iter.next() {
                Some(Token::Quoted(id)) => Some(id),
                _ => None,
            }
        }
        _ => None,
    };
    Ok(DocType {
        root,
        system_id,
        internal_subset,
    })
}

/// Parses DTD text into table schemas, in table order.
pub fn parse_dtd(text: &str, root: &str, case: CaseSensitivity) -> Result<Vec<TableSchema>> {
    let mut root_model: Option<Vec<String>> = None;
    let mut declared: Vec<(String, Vec<Column>)> = Vec::new();

    for declaration in declarations(text)? {
        match declaration.keyword.as_str() {
            "ELEMENT" => {
                let tokens = tokenize(&declaration.body)?;
                let Some(Token::Word(name)) = tokens.first() else {
                    return Err(FixtureError::malformed("ELEMENT declaration without a name"));
                };
                if name == root {
                    let names = tokens
                        .iter()
                        .skip(1)
                        .filter_map(|token| match token {
                            Token::Group(model) => Some(content_model_names(model)),
                            _ => None,
                        })
                        .flatten()
                        .collect::<Vec<_>>();
                    root_model = Some(names);
                } else {
                    declared_entry(&mut declared, name, case);
                }
            }
            "ATTLIST" => {
                let tokens = tokenize(&declaration.body)?;
                let mut iter = tokens.into_iter().peekable();
                let Some(Token::Word(element)) = iter.next() else {
                    return Err(FixtureError::malformed("ATTLIST declaration without an element name"));
                };
                if element == root {
                    continue;
                }
                let columns = declared_entry(&mut declared, &element, case);
                while let Some(token) = iter.next() {
                    let Token::Word(attribute) = token else {
                        return Err(FixtureError::malformed(format!(
                            "Unexpected token in ATTLIST for {element}"
                        )));
                    };
                    // attribute type: a keyword, optionally followed by an enumeration
                    let mut nullable = true;
                    match iter.next() {
                        Some(Token::Word(kind)) if kind == "NOTATION" => {
                            iter.next();
                        }
                        Some(_) => {}
                        None => {
                            return Err(FixtureError::malformed(format!(
                                "Attribute {attribute} of {element} has no type"
                            )));
                        }
                    }
                    match iter.next() {
                        Some(Token::Word(default)) if default == "#REQUIRED" => nullable = false,
                        Some(Token::Word(default)) if default == "#FIXED" => {
                            iter.next();
                        }
                        Some(_) | None => {}
                    }
                    if columns.iter().any(|column: &Column| case.matches(column.name(), &attribute)) {
                        continue;
                    }
                    columns.push(Column::new(attribute.as_str(), ColumnType::Unknown).with_nullable(nullable));
                }
            }
            other => debug!("Skipping DTD declaration <!{other} ...>"),
        }
    }

    let mut order: Vec<String> = Vec::new();
    if let Some(model) = root_model {
        for name in model {
            if !order.iter().any(|existing| case.matches(existing, &name)) {
                order.push(name);
            }
        }
    }
    for (name, _) in &declared {
        if !order.iter().any(|existing| case.matches(existing, name)) {
            order.push(name.clone());
        }
    }

    order
        .into_iter()
        .map(|name| {
            let columns = declared
                .iter()
                .find(|(declared_name, _)| case.matches(declared_name, &name))
                .map(|(_, columns)| columns.clone())
                .unwrap_or_default();
            TableSchema::new(name.as_str(), columns, case)
        })
        .collect()
}

/// Renders table schemas as a flat DTD.
pub fn write_dtd<'a>(schemas: impl IntoIterator<Item = &'a TableSchema>, root: &str) -> String {
    let schemas = schemas.into_iter().collect::<Vec<_>>();
    let mut out = String::new();
    let model = schemas
        .iter()
        .map(|schema| format!("{}*", schema.name()))
        .collect::<Vec<_>>()
        .join(", ");
    if model.is_empty() {
        let _ = writeln!(out, "<!ELEMENT {root} EMPTY>");
    } else {
        let _ = writeln!(out, "<!ELEMENT {root} ({model})>");
    }
    for schema in schemas {
        let _ = writeln!(out, "<!ELEMENT {} EMPTY>", schema.name());
        if schema.column_count() == 0 {
            continue;
        }
        let _ = write!(out, "<!ATTLIST {}", schema.name());
        for column in schema.columns() {
            let mode = if column.is_nullable() {
                "#IMPLIED"
            } else {
                "#REQUIRED"
            };
            let _ = write!(out, "\n    {} CDATA {mode}", column.name());
        }
        let _ = writeln!(out, ">");
    }
    out
}

fn declared_entry<'a>(
    declared: &'a mut Vec<(String, Vec<Column>)>,
    name: &str,
    case: CaseSensitivity,
) -> &'a mut Vec<Column> {
    let idx = match declared
        .iter()
        .position(|(existing, _)| case.matches(existing, name))
    {
        Some(idx) => idx,
        None => {
            declared.push((name.to_string(), Vec::new()));
            declared.len() - 1
        }
    };
    &mut declared[idx].1
}

fn content_model_names(model: &str) -> Vec<String> {
    model
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '#')))
        .filter(|token| !token.is_empty() && !token.starts_with('#'))
        .map(str::to_string)
        .collect()
}

struct Declaration {
    keyword: String,
    body: String,
}

fn declarations(text: &str) -> Result<Vec<Declaration>> {
    let mut out = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(out);
        }
        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after
                .find("-->")
                .ok_or_else(|| FixtureError::malformed("Unterminated comment in DTD"))?;
            rest = &after[end + 3..];
            continue;
        }
        if let Some(after) = rest.strip_prefix("<?") {
            let end = after
                .find("?>")
                .ok_or_else(|| FixtureError::malformed("Unterminated processing instruction in DTD"))?;
            rest = &after[end + 2..];
            continue;
        }
        if rest.starts_with('%') {
            // parameter entity reference
            let end = rest
                .find(';')
                .ok_or_else(|| FixtureError::malformed("Unterminated parameter entity reference"))?;
            rest = &rest[end + 1..];
            continue;
        }
        let Some(after) = rest.strip_prefix("<!") else {
            let preview = rest.chars().take(20).collect::<String>();
            return Err(FixtureError::malformed(format!(
                "Unexpected content in DTD near '{preview}'"
            )));
        };
        let end = declaration_end(after)
            .ok_or_else(|| FixtureError::malformed("Unterminated declaration in DTD"))?;
        let inner = &after[..end];
        let keyword_len = inner
            .find(|c: char| c.is_whitespace())
            .unwrap_or(inner.len());
        out.push(Declaration {
            keyword: inner[..keyword_len].to_string(),
            body: inner[keyword_len..].trim().to_string(),
        });
        rest = &after[end + 1..];
    }
}

fn declaration_end(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Group(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        match ch {
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(FixtureError::malformed("Unterminated quoted literal in DTD"));
                }
                tokens.push(Token::Quoted(value));
            }
            '(' => {
                let mut depth = 0usize;
                let mut end = None;
                for (idx, c) in chars.by_ref() {
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(idx);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| FixtureError::malformed("Unbalanced parentheses in DTD"))?;
                tokens.push(Token::Group(text[start + 1..end].to_string()));
                // occurrence indicator directly after a group
                while let Some(&(_, c)) = chars.peek() {
                    if matches!(c, '*' | '+' | '?') {
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '"' | '\'' | '(') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <!-- fixture grammar -->
        <!ELEMENT dataset (ORDERS*, USERS*)>
        <!ELEMENT USERS EMPTY>
        <!ATTLIST USERS
            ID CDATA #REQUIRED
            NAME CDATA #IMPLIED
            STATUS (active|disabled) "active">
        <!ELEMENT ORDERS EMPTY>
        <!ATTLIST ORDERS ID CDATA #REQUIRED USER_ID CDATA #FIXED "1">
        <!ELEMENT AUDIT EMPTY>
    "#;

    #[test]
    fn root_content_model_drives_table_order() {
        let schemas = parse_dtd(SAMPLE, DEFAULT_ROOT_ELEMENT, CaseSensitivity::Insensitive).unwrap();
        let names = schemas.iter().map(TableSchema::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["ORDERS", "USERS", "AUDIT"]);
    }

    #[test]
    fn attributes_become_ordered_columns_with_nullability() {
        let schemas = parse_dtd(SAMPLE, DEFAULT_ROOT_ELEMENT, CaseSensitivity::Insensitive).unwrap();
        let users = &schemas[1];
        assert_eq!(users.column_names().collect::<Vec<_>>(), vec!["ID", "NAME", "STATUS"]);
        assert!(!users.columns()[0].is_nullable());
        assert!(users.columns()[1].is_nullable());
        let orders = &schemas[0];
        assert_eq!(orders.column_names().collect::<Vec<_>>(), vec!["ID", "USER_ID"]);
        assert_eq!(schemas[2].column_count(), 0);
    }

    #[test]
    fn doctype_with_internal_subset_and_system_id() {
        let doctype = parse_doctype(r#"dataset SYSTEM "fixture.dtd" [ <!ELEMENT dataset (A*)> ]"#).unwrap();
        assert_eq!(doctype.root, "dataset");
        assert_eq!(doctype.system_id.as_deref(), Some("fixture.dtd"));
        assert_eq!(doctype.internal_subset.as_deref().map(str::trim), Some("<!ELEMENT dataset (A*)>"));

        let bare = parse_doctype(" dataset ").unwrap();
        assert_eq!(bare.system_id, None);
        assert_eq!(bare.internal_subset, None);
    }

    #[test]
    fn written_dtd_parses_back_to_the_same_schemas() {
        let schemas = parse_dtd(SAMPLE, DEFAULT_ROOT_ELEMENT, CaseSensitivity::Insensitive).unwrap();
        let rendered = write_dtd(&schemas, DEFAULT_ROOT_ELEMENT);
        let reparsed = parse_dtd(&rendered, DEFAULT_ROOT_ELEMENT, CaseSensitivity::Insensitive).unwrap();
        assert_eq!(schemas.len(), reparsed.len());
        for (left, right) in schemas.iter().zip(&reparsed) {
            assert!(left.same_shape(right));
        }
    }

    #[test]
    fn unterminated_declaration_is_malformed() {
        let err = parse_dtd("<!ELEMENT dataset (A*)", DEFAULT_ROOT_ELEMENT, CaseSensitivity::Insensitive)
            .unwrap_err();
        assert!(matches!(err, FixtureError::MalformedDataSet(_)));
    }
}
