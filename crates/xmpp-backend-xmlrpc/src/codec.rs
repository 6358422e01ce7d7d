//! Minimal XML-RPC codec covering the value types ejabberd exchanges.
//!
//! Calls are written by hand; responses are read with `quick-xml` into a small
//! element tree and then interpreted.

use std::borrow::Cow;
use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The server answered with a `<fault>`.
    #[error("Fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("Malformed XML-RPC response: {0}")]
    Malformed(String),
}

fn malformed(cause: impl fmt::Display) -> CodecError {
    CodecError::Malformed(cause.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    /// Members keep their order so encoded calls are deterministic.
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn structure<K: Into<String>>(members: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Struct(
            members
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Look up a struct member.
    ///
    /// ejabberd encodes tuples as arrays of single-member structs, so arrays are
    /// searched element by element.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Struct(members) => members
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            Self::Array(items) => items.iter().find_map(|item| item.get(key)),
            _ => None,
        }
    }

    /// Integers, including integers sent as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Serialize a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(value) => out.push_str(&format!("<int>{}</int>", value)),
        Value::Bool(value) => out.push_str(if *value {
            "<boolean>1</boolean>"
        } else {
            "<boolean>0</boolean>"
        }),
        Value::Double(value) => out.push_str(&format!("<double>{}</double>", value)),
        Value::String(value) => {
            out.push_str("<string>");
            out.push_str(&escape(value.as_str()));
            out.push_str("</string>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, value) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(out, value);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Parse a `methodResponse` document into its single return value.
///
/// A `<fault>` response yields [`CodecError::Fault`].
pub fn decode_response(xml: &str) -> Result<Value, CodecError> {
    let root = parse_tree(xml)?;
    if root.name != "methodResponse" {
        return Err(malformed(format!("unexpected root element <{}>", root.name)));
    }

    if let Some(fault) = root.find("fault") {
        let fault = decode_value(fault.child("value")?)?;
        return Err(CodecError::Fault {
            code: fault.get("faultCode").and_then(Value::as_i64).unwrap_or_default(),
            message: fault
                .get("faultString")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    decode_value(root.child("params")?.child("param")?.child("value")?)
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn child(&self, name: &str) -> Result<&Element, CodecError> {
        self.find(name)
            .ok_or_else(|| malformed(format!("<{}> without <{}>", self.name, name)))
    }
}

fn parse_tree(xml: &str) -> Result<Element, CodecError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(Element::named(start.name().as_ref())),
            Event::Empty(start) => {
                attach(&mut stack, &mut root, Element::named(start.name().as_ref()))
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    let data: Cow<'_, [u8]> = data.into_inner();
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("empty document"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn decode_value(element: &Element) -> Result<Value, CodecError> {
    // An untyped <value> is a string.
    let Some(typed) = element.children.first() else {
        return Ok(Value::String(element.text.clone()));
    };

    let text = typed.text.trim();
    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(format!("invalid integer {:?}", text))),
        "boolean" => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            _ => Err(malformed(format!("invalid boolean {:?}", text))),
        },
        "double" => text
            .parse()
            .map(Value::Double)
            .map_err(|_| malformed(format!("invalid double {:?}", text))),
        "string" => Ok(Value::String(typed.text.clone())),
        "array" => typed
            .child("data")?
            .children
            .iter()
            .filter(|child| child.name == "value")
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "struct" => typed
            .children
            .iter()
            .filter(|child| child.name == "member")
            .map(|member| {
                let name = member.child("name")?.text.clone();
                let value = decode_value(member.child("value")?)?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, CodecError>>()
            .map(Value::Struct),
        other => Err(malformed(format!("unsupported type <{}>", other))),
    }
}
