use std::collections::BTreeMap;
use std::fmt;

const INDENT: &str = "  ";

/// Attribute value in a configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&BTreeMap<String, String>> for Value {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Attribute(String, Value),
    Block(Block),
}

/// A labelled block with attributes and nested blocks, kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Vec<BodyItem>,
}

impl Block {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            labels: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.push(BodyItem::Attribute(key.into(), value.into()));
        self
    }

    pub fn attr_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    pub fn block(mut self, child: Block) -> Self {
        self.body.push(BodyItem::Block(child));
        self
    }

    pub fn blocks(mut self, children: impl IntoIterator<Item = Block>) -> Self {
        for child in children {
            self.body.push(BodyItem::Block(child));
        }
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.body.iter().find_map(|item| match item {
            BodyItem::Attribute(name, value) if name == key => Some(value),
            _ => None,
        })
    }

    pub fn child_blocks<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.body.iter().filter_map(move |item| match item {
            BodyItem::Block(block) if block.kind == kind => Some(block),
            _ => None,
        })
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        out.push_str(&pad);
        out.push_str(&self.kind);
        for label in &self.labels {
            out.push_str(" \"");
            out.push_str(&escape_string(label));
            out.push('"');
        }
        out.push_str(" {\n");

        let inner = INDENT.repeat(depth + 1);
        let mut idx = 0;
        let mut first = true;
        while idx < self.body.len() {
            if !first {
                out.push('\n');
            }
            first = false;
            match &self.body[idx] {
                BodyItem::Block(block) => {
                    block.render_into(out, depth + 1);
                    idx += 1;
                }
                BodyItem::Attribute(..) => {
                    // Consecutive attributes are rendered as one aligned group.
                    let end = self.body[idx..]
                        .iter()
                        .position(|item| matches!(item, BodyItem::Block(_)))
                        .map(|offset| idx + offset)
                        .unwrap_or(self.body.len());
                    let width = self.body[idx..end]
                        .iter()
                        .map(|item| match item {
                            BodyItem::Attribute(key, _) => key.len(),
                            BodyItem::Block(_) => 0,
                        })
                        .max()
                        .unwrap_or(0);
                    for item in &self.body[idx..end] {
                        if let BodyItem::Attribute(key, value) = item {
                            out.push_str(&inner);
                            out.push_str(&format!("{key:<width$} = "));
                            render_value(value, out, depth + 1);
                            out.push('\n');
                        }
                    }
                    idx = end;
                }
            }
        }

        out.push_str(&pad);
        out.push_str("}\n");
    }
}

/// A configuration document made of top-level blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            block.render_into(&mut out, 0);
        }
        out
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_value(value: &Value, out: &mut String, depth: usize) {
    match value {
        Value::String(s) => {
            out.push('"');
            out.push_str(&escape_string(s));
            out.push('"');
        }
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::List(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                render_value(item, out, depth);
            }
            out.push(']');
        }
        Value::Map(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            let inner = INDENT.repeat(depth + 1);
            let width = map.keys().map(|key| key.len() + 2).max().unwrap_or(0);
            out.push_str("{\n");
            for (key, item) in map {
                let quoted = format!("\"{}\"", escape_string(key));
                out.push_str(&inner);
                out.push_str(&format!("{quoted:<width$} = "));
                render_value(item, out, depth + 1);
                out.push('\n');
            }
            out.push_str(&INDENT.repeat(depth));
            out.push('}');
        }
    }
}

/// Shortest decimal form, matching how numbers appear in flattened state.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Escapes a string literal so it cannot open an interpolation or template directive.
pub fn escape_string(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                escaped.push(ch);
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_blocks_with_aligned_attributes() {
        let block = Block::new("resource")
            .label("aws_securityhub_automation_rule")
            .label("test")
            .attr("description", "test description")
            .attr("rule_order", 1)
            .block(Block::new("criteria").block(
                Block::new("aws_account_id")
                    .attr("comparison", "EQUALS")
                    .attr("value", "1234567890"),
            ));

        let mut doc = Document::new();
        doc.push(block);
        let rendered = doc.render();

        let expected = r#"resource "aws_securityhub_automation_rule" "test" {
  description = "test description"
  rule_order  = 1

  criteria {
    aws_account_id {
      comparison = "EQUALS"
      value      = "1234567890"
    }
  }
}
"#;
        assert_eq!(rendered, expected);
    }

    #[test]
    fn escapes_interpolation_and_quotes() {
        assert_eq!(escape_string(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_string("${var.x}"), "$${var.x}");
        assert_eq!(escape_string("%{ if }"), "%%{ if }");
        assert_eq!(escape_string("cost $5"), "cost $5");
        assert_eq!(escape_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn renders_maps_with_quoted_keys() {
        let mut tags = BTreeMap::new();
        tags.insert("key1".to_string(), "value1".to_string());
        tags.insert("key2".to_string(), "value2".to_string());
        let block = Block::new("resource").attr("tags", &tags);

        let mut doc = Document::new();
        doc.push(block);
        let rendered = doc.render();

        assert!(rendered.contains("tags = {\n"));
        assert!(rendered.contains("    \"key1\" = \"value1\"\n"));
        assert!(rendered.contains("    \"key2\" = \"value2\"\n"));
        assert!(rendered.contains("  }\n}\n"));
    }

    #[test]
    fn formats_numbers_in_shortest_form() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(50.0), "50");
    }
}
