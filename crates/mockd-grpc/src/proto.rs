//! Runtime .proto parsing
//!
//! Parses a proto3 subset at mock start — packages, (nested) messages
//! with scalar/repeated/message/enum fields, enums and service/rpc
//! declarations including `stream` markers — into a
//! `prost_types::FileDescriptorProto`, loaded into a
//! `prost_reflect::DescriptorPool` for dynamic message work. The mock
//! fails fast on any construct outside the subset.

use mockd_core::{Error, Result};
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto,
};
use std::collections::HashSet;

/// A parsed service definition.
#[derive(Debug, Clone)]
pub struct ProtoService {
    /// Fully-qualified name, e.g. `demo.greeter.Greeter`.
    pub name: String,
    pub methods: Vec<ProtoMethod>,
}

/// A parsed rpc method.
#[derive(Debug, Clone)]
pub struct ProtoMethod {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

/// Parse result: the descriptor pool plus the service index.
#[derive(Debug)]
pub struct ParsedProto {
    pub pool: DescriptorPool,
    pub services: Vec<ProtoService>,
}

/// Parse proto3 source text.
pub fn parse_proto(source: &str) -> Result<ParsedProto> {
    let tokens = tokenize(source);
    let mut parser = Parser { tokens, pos: 0 };
    let file = parser.parse_file()?;

    let services = file
        .service
        .iter()
        .map(|service| ProtoService {
            name: qualify(file.package(), service.name()),
            methods: service
                .method
                .iter()
                .map(|method| ProtoMethod {
                    name: method.name().to_string(),
                    input_type: method.input_type().to_string(),
                    output_type: method.output_type().to_string(),
                    client_streaming: method.client_streaming(),
                    server_streaming: method.server_streaming(),
                })
                .collect(),
        })
        .collect();

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_protos([file])
        .map_err(|e| Error::validation(format!("proto descriptor rejected: {e}")))?;
    Ok(ParsedProto { pool, services })
}

/// Parse a .proto file from disk.
pub fn parse_proto_file(path: &str) -> Result<ParsedProto> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("cannot read proto file {path}: {e}")))?;
    parse_proto(&source)
}

fn qualify(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}.{name}")
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(source: &str) -> Vec<String> {
    let without_comments = strip_comments(source);
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in without_comments.chars() {
        match ch {
            '{' | '}' | '(' | ')' | ';' | '=' | ',' | '[' | ']' | '<' | '>' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(ch.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '/' {
            match chars.peek() {
                Some('/') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut previous = ' ';
                    for c in chars.by_ref() {
                        if previous == '*' && c == '/' {
                            break;
                        }
                        previous = c;
                    }
                    out.push(' ');
                    continue;
                }
                _ => {}
            }
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::validation("unexpected end of proto file"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &str) -> Result<()> {
        let token = self.next()?;
        if token != expected {
            return Err(Error::validation(format!(
                "expected {expected:?} but found {token:?} in proto file"
            )));
        }
        Ok(())
    }

    /// Skip to (and past) the next `;`.
    fn skip_statement(&mut self) -> Result<()> {
        while self.next()? != ";" {}
        Ok(())
    }

    fn parse_file(&mut self) -> Result<FileDescriptorProto> {
        let mut file = FileDescriptorProto {
            name: Some("mock.proto".to_string()),
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };

        while let Some(token) = self.peek() {
            match token {
                "syntax" | "option" => self.skip_statement()?,
                "package" => {
                    self.next()?;
                    file.package = Some(self.next()?);
                    self.expect(";")?;
                }
                "import" => {
                    return Err(Error::validation(
                        "proto imports are not supported; inline the types instead",
                    ));
                }
                "message" => {
                    let message = self.parse_message()?;
                    file.message_type.push(message);
                }
                "enum" => {
                    let parsed = self.parse_enum()?;
                    file.enum_type.push(parsed);
                }
                "service" => {
                    let service = self.parse_service(file.package())?;
                    file.service.push(service);
                }
                other => {
                    return Err(Error::validation(format!(
                        "unsupported top-level proto element {other:?}"
                    )));
                }
            }
        }

        resolve_types(&mut file)?;
        Ok(file)
    }

    fn parse_message(&mut self) -> Result<DescriptorProto> {
        self.expect("message")?;
        let name = self.next()?;
        self.expect("{")?;
        let mut message = DescriptorProto { name: Some(name), ..Default::default() };

        loop {
            let token = self
                .peek()
                .ok_or_else(|| Error::validation("unterminated message block"))?
                .to_string();
            match token.as_str() {
                "}" => {
                    self.next()?;
                    return Ok(message);
                }
                "message" => {
                    let nested = self.parse_message()?;
                    message.nested_type.push(nested);
                }
                "enum" => {
                    let nested = self.parse_enum()?;
                    message.enum_type.push(nested);
                }
                "option" | "reserved" => self.skip_statement()?,
                "oneof" | "map" => {
                    return Err(Error::validation(format!(
                        "proto {token} fields are not supported"
                    )));
                }
                _ => {
                    let field = self.parse_field()?;
                    message.field.push(field);
                }
            }
        }
    }

    fn parse_field(&mut self) -> Result<FieldDescriptorProto> {
        let mut token = self.next()?;
        let label = match token.as_str() {
            "repeated" => {
                token = self.next()?;
                Label::Repeated
            }
            "optional" => {
                token = self.next()?;
                Label::Optional
            }
            _ => Label::Optional,
        };
        let type_token = token;
        let name = self.next()?;
        self.expect("=")?;
        let number: i32 = self
            .next()?
            .parse()
            .map_err(|_| Error::validation("field number is not an integer"))?;
        // Field options in brackets are tolerated and ignored.
        if self.peek() == Some("[") {
            while self.next()? != "]" {}
        }
        self.expect(";")?;

        let mut field = FieldDescriptorProto {
            name: Some(name),
            number: Some(number),
            label: Some(label as i32),
            ..Default::default()
        };
        match scalar_type(&type_token) {
            Some(scalar) => field.r#type = Some(scalar as i32),
            None => {
                // Message or enum reference; resolved after the whole
                // file is parsed.
                field.type_name = Some(type_token);
            }
        }
        Ok(field)
    }

    fn parse_enum(&mut self) -> Result<EnumDescriptorProto> {
        self.expect("enum")?;
        let name = self.next()?;
        self.expect("{")?;
        let mut parsed = EnumDescriptorProto { name: Some(name), ..Default::default() };
        loop {
            let token = self.next()?;
            match token.as_str() {
                "}" => return Ok(parsed),
                "option" | "reserved" => {
                    while self.next()? != ";" {}
                }
                value_name => {
                    self.expect("=")?;
                    let number: i32 = self
                        .next()?
                        .parse()
                        .map_err(|_| Error::validation("enum value is not an integer"))?;
                    self.expect(";")?;
                    parsed.value.push(EnumValueDescriptorProto {
                        name: Some(value_name.to_string()),
                        number: Some(number),
                        ..Default::default()
                    });
                }
            }
        }
    }

    fn parse_service(&mut self, package: &str) -> Result<ServiceDescriptorProto> {
        self.expect("service")?;
        let name = self.next()?;
        self.expect("{")?;
        let mut service = ServiceDescriptorProto { name: Some(name), ..Default::default() };

        loop {
            let token = self.next()?;
            match token.as_str() {
                "}" => return Ok(service),
                "option" => self.skip_statement()?,
                "rpc" => {
                    let method_name = self.next()?;
                    self.expect("(")?;
                    let (client_streaming, input) = self.parse_rpc_type()?;
                    self.expect(")")?;
                    self.expect("returns")?;
                    self.expect("(")?;
                    let (server_streaming, output) = self.parse_rpc_type()?;
                    self.expect(")")?;
                    // `;` or an empty options block.
                    match self.next()?.as_str() {
                        ";" => {}
                        "{" => {
                            let mut depth = 1;
                            while depth > 0 {
                                match self.next()?.as_str() {
                                    "{" => depth += 1,
                                    "}" => depth -= 1,
                                    _ => {}
                                }
                            }
                        }
                        other => {
                            return Err(Error::validation(format!(
                                "unexpected token {other:?} after rpc declaration"
                            )));
                        }
                    }
                    service.method.push(MethodDescriptorProto {
                        name: Some(method_name),
                        input_type: Some(absolute(package, &input)),
                        output_type: Some(absolute(package, &output)),
                        client_streaming: Some(client_streaming),
                        server_streaming: Some(server_streaming),
                        ..Default::default()
                    });
                }
                other => {
                    return Err(Error::validation(format!(
                        "unexpected token {other:?} in service block"
                    )));
                }
            }
        }
    }

    fn parse_rpc_type(&mut self) -> Result<(bool, String)> {
        let token = self.next()?;
        if token == "stream" {
            Ok((true, self.next()?))
        } else {
            Ok((false, token))
        }
    }
}

fn scalar_type(token: &str) -> Option<Type> {
    Some(match token {
        "double" => Type::Double,
        "float" => Type::Float,
        "int32" => Type::Int32,
        "int64" => Type::Int64,
        "uint32" => Type::Uint32,
        "uint64" => Type::Uint64,
        "sint32" => Type::Sint32,
        "sint64" => Type::Sint64,
        "fixed32" => Type::Fixed32,
        "fixed64" => Type::Fixed64,
        "sfixed32" => Type::Sfixed32,
        "sfixed64" => Type::Sfixed64,
        "bool" => Type::Bool,
        "string" => Type::String,
        "bytes" => Type::Bytes,
        _ => return None,
    })
}

fn absolute(package: &str, name: &str) -> String {
    if name.starts_with('.') {
        name.to_string()
    } else if package.is_empty() {
        format!(".{name}")
    } else {
        format!(".{package}.{name}")
    }
}

/// Second pass: turn bare type references into fully-qualified message
/// or enum references, failing on unknown names.
fn resolve_types(file: &mut FileDescriptorProto) -> Result<()> {
    let package = file.package().to_string();
    let mut messages = HashSet::new();
    let mut enums = HashSet::new();
    for message in &file.message_type {
        collect_names(message, &package, &mut messages, &mut enums);
    }
    for parsed in &file.enum_type {
        enums.insert(qualify(&package, parsed.name()));
    }

    for message in &mut file.message_type {
        resolve_message(message, &package, &messages, &enums)?;
    }

    for service in &file.service {
        for method in &service.method {
            for type_name in [method.input_type(), method.output_type()] {
                if !messages.contains(type_name.trim_start_matches('.')) {
                    return Err(Error::validation(format!(
                        "rpc references unknown message {type_name}"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn collect_names(
    message: &DescriptorProto,
    scope: &str,
    messages: &mut HashSet<String>,
    enums: &mut HashSet<String>,
) {
    let full = qualify(scope, message.name());
    messages.insert(full.clone());
    for nested in &message.nested_type {
        collect_names(nested, &full, messages, enums);
    }
    for parsed in &message.enum_type {
        enums.insert(qualify(&full, parsed.name()));
    }
}

fn resolve_message(
    message: &mut DescriptorProto,
    scope: &str,
    messages: &HashSet<String>,
    enums: &HashSet<String>,
) -> Result<()> {
    let full = qualify(scope, message.name());
    for field in &mut message.field {
        if field.r#type.is_some() {
            continue;
        }
        let reference = field.type_name().trim_start_matches('.').to_string();
        // Look up in the enclosing scope first, then the file scope.
        let candidates = [qualify(&full, &reference), qualify(scope, &reference), reference.clone()];
        let resolved = candidates.iter().find_map(|candidate| {
            if messages.contains(candidate) {
                Some((Type::Message, candidate.clone()))
            } else if enums.contains(candidate) {
                Some((Type::Enum, candidate.clone()))
            } else {
                None
            }
        });
        match resolved {
            Some((kind, name)) => {
                field.r#type = Some(kind as i32);
                field.type_name = Some(format!(".{name}"));
            }
            None => {
                return Err(Error::validation(format!(
                    "field {} references unknown type {reference}",
                    field.name()
                )));
            }
        }
    }
    let nested: Vec<_> = std::mem::take(&mut message.nested_type);
    message.nested_type = nested
        .into_iter()
        .map(|mut n| resolve_message(&mut n, &full, messages, enums).map(|()| n))
        .collect::<Result<_>>()?;
    Ok(())
}
