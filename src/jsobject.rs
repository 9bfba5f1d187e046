//! Parsing of JS object source (`export default { … }`) into functions and variables.

use crate::error::ParseError;
use crate::parser::{Expr, Parser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedJsSubAction {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedVariable {
    pub name: String,
    pub value: String,
}

/// Functions and variables of a JS object, in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedJsBody {
    #[serde(default)]
    pub actions: Vec<ParsedJsSubAction>,
    #[serde(default)]
    pub variables: Vec<ParsedVariable>,
}

impl ParsedJsBody {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.variables.is_empty()
    }

    pub fn action(mut self, name: &str, body: &str, arguments: &[&str]) -> Self {
        self.actions.push(ParsedJsSubAction {
            name: name.to_string(),
            body: body.to_string(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.variables.push(ParsedVariable {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }
}

/// Parses the source of a JS object.
///
/// Blank source yields an empty body. Function entries keep their source
/// text; method shorthand (`name(a) { … }`) is normalised to a `function`
/// expression so the text evaluates on its own. Variables keep the source
/// text of their initialiser.
pub fn parse_js_object(source: &str) -> Result<ParsedJsBody, ParseError> {
    let mut body = ParsedJsBody::default();
    if source.trim().is_empty() {
        return Ok(body);
    }

    let mut parser = Parser::new(source)?;
    if !parser.eat_ident("export") || !parser.eat_ident("default") {
        return Err(parser.unexpected("'export default'"));
    }
    parser.expect_punct("{")?;

    let mut seen = BTreeSet::new();
    while !parser.peek().is_punct("}") {
        let key_start = parser.peek().start;
        let entry = if parser.peek_at(1).is_punct(":") {
            let name = parser.expect_property_key()?;
            parser.expect_punct(":")?;
            let value_start = parser.peek().start;
            let value = parser.parse_expression()?;
            let text = parser.source_slice(value_start, parser.last_end());
            classify(name, value, text.to_string())
        } else {
            let method = is_method_shorthand(&parser);
            let (name, value) = parser.parse_object_entry()?;
            let text = parser.source_slice(key_start, parser.last_end());
            let text = if method {
                shorthand_to_function(text, &name)
            } else {
                text.to_string()
            };
            classify(name, value, text)
        };

        let name = match &entry {
            Entry::Action(action) => action.name.clone(),
            Entry::Variable(variable) => variable.name.clone(),
        };
        if !seen.insert(name.clone()) {
            return Err(ParseError::new(format!("duplicate key {}", name), key_start));
        }
        match entry {
            Entry::Action(action) => body.actions.push(action),
            Entry::Variable(variable) => body.variables.push(variable),
        }

        if !parser.eat_punct(",") {
            break;
        }
    }
    parser.expect_punct("}")?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    Ok(body)
}

enum Entry {
    Action(ParsedJsSubAction),
    Variable(ParsedVariable),
}

fn classify(name: String, value: Expr, text: String) -> Entry {
    match value {
        Expr::Function(function) => Entry::Action(ParsedJsSubAction {
            name,
            body: text,
            arguments: function.params.clone(),
        }),
        _ => Entry::Variable(ParsedVariable { name, value: text }),
    }
}

fn is_method_shorthand(parser: &Parser<'_>) -> bool {
    let offset = usize::from(parser.peek().is_ident("async") && !parser.peek_at(1).is_punct("("));
    parser.peek_at(offset + 1).is_punct("(")
}

/// `async name(a) { … }` becomes `async function (a) { … }`.
fn shorthand_to_function(text: &str, name: &str) -> String {
    let (prefix, rest) = match text.strip_prefix("async") {
        Some(rest) if rest.starts_with(char::is_whitespace) => ("async function ", rest.trim_start()),
        _ => ("function ", text),
    };
    let params = rest
        .strip_prefix(name)
        .or_else(|| rest.find('(').map(|i| &rest[i..]))
        .unwrap_or(rest);
    format!("{}{}", prefix, params.trim_start())
}
