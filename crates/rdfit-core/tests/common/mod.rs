//! Shared toy record model and parsers for the integration tests.
//!
//! Documents are plain text, one record per line: three tokens make a
//! triple, four a quad, `@prefix p: <iri>` declares a prefix, `#` starts
//! a comment and a line starting with `!` is a syntax error. A leading
//! comment names the document.

#![allow(dead_code)]

use rhi_rdfit_core::{
    Advance, BoxIt, BoxObject, ConvertError, EagerIt, FnConverter, FnNormalizer, ItElement,
    ParserDecl, PullParser, PushParser, RdfIt, RdfItError, RdfListener, Rit, SourceInfo, TypeKey,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub s: String,
    pub p: String,
    pub o: String,
}

impl Triple {
    pub fn new(s: &str, p: &str, o: &str) -> Self {
        Self {
            s: s.into(),
            p: p.into(),
            o: o.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    pub triple: Triple,
    pub graph: String,
}

/// Alternative record model: an N-Triples style line.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement(pub String);

/// Text source read by the pull parser.
#[derive(Debug, Clone)]
pub struct Document(pub String);

/// Text source read by the push parser.
#[derive(Debug, Clone)]
pub struct Stream(pub String);

/// Name of an in-memory document, normalized into a [`Document`].
#[derive(Debug, Clone)]
pub struct Named(pub &'static str);

pub enum Line {
    Triple(Triple),
    Quad(Quad),
    Prefix(String, String),
    Blank,
}

pub fn parse_line(line: &str) -> Result<Line, RdfItError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Line::Blank);
    }
    if line.starts_with('!') {
        return Err(RdfItError::Parse(format!("bad line: {line}")));
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["@prefix", prefix, iri] => Ok(Line::Prefix(
            prefix.trim_end_matches(':').to_string(),
            iri.trim_matches(|c| c == '<' || c == '>').to_string(),
        )),
        [s, p, o] => Ok(Line::Triple(Triple::new(s, p, o))),
        [s, p, o, g] => Ok(Line::Quad(Quad {
            triple: Triple::new(s, p, o),
            graph: g.to_string(),
        })),
        _ => Err(RdfItError::Parse(format!("expected 3 or 4 tokens: {line}"))),
    }
}

/// Activity counters shared between a parser and the test observing it.
#[derive(Debug, Default, Clone)]
pub struct Probe {
    pub opened: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<Vec<String>>>,
    pub delivered: Arc<AtomicUsize>,
    pub running: Arc<AtomicBool>,
}

impl Probe {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Pull parser
// ============================================================================

struct DocumentLines {
    name: String,
    lines: std::vec::IntoIter<String>,
    element: ItElement,
    probe: Probe,
}

impl Advance for DocumentLines {
    fn advance(&mut self) -> Result<Option<BoxObject>, RdfItError> {
        for line in self.lines.by_ref() {
            match (parse_line(&line)?, self.element) {
                (Line::Triple(t), ItElement::Triple) => return Ok(Some(Box::new(t))),
                (Line::Quad(q), ItElement::Quad) => return Ok(Some(Box::new(q))),
                _ => continue,
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.probe.closed.lock().unwrap().push(self.name.clone());
    }
}

/// Pull parser over [`Document`]s.
pub struct DocumentParser {
    decl: ParserDecl,
    element: ItElement,
    pub probe: Probe,
}

impl DocumentParser {
    pub fn triples() -> Self {
        Self {
            decl: ParserDecl::new("doc-triples")
                .source_of::<Document>()
                .syntax("text/x-toy")
                .triples(TypeKey::of::<Triple>()),
            element: ItElement::Triple,
            probe: Probe::default(),
        }
    }

    pub fn quads() -> Self {
        Self {
            decl: ParserDecl::new("doc-quads")
                .source_of::<Document>()
                .syntax("text/x-toy")
                .quads(TypeKey::of::<Quad>()),
            element: ItElement::Quad,
            probe: Probe::default(),
        }
    }
}

impl PullParser for DocumentParser {
    fn decl(&self) -> &ParserDecl {
        &self.decl
    }

    fn parse(&self, source: BoxObject) -> Result<BoxIt, RdfItError> {
        let origin = SourceInfo::of(&*source);
        let doc = source
            .downcast_ref::<Document>()
            .ok_or_else(|| RdfItError::Parse("expected a document".into()))?;
        if doc.0.starts_with("unreadable") {
            return Err(RdfItError::Parse(format!("cannot open {}", doc.0)));
        }
        let name = doc
            .0
            .lines()
            .next()
            .and_then(|first| first.strip_prefix("# "))
            .unwrap_or("document")
            .to_string();
        self.probe.opened.lock().unwrap().push(name.clone());
        let lines: Vec<String> = doc.0.lines().map(str::to_string).collect();
        let value_type = match self.element {
            ItElement::Triple => TypeKey::of::<Triple>(),
            ItElement::Quad => TypeKey::of::<Quad>(),
        };
        Ok(Box::new(EagerIt::new(
            DocumentLines {
                name,
                lines: lines.into_iter(),
                element: self.element,
                probe: self.probe.clone(),
            },
            value_type,
            self.element,
            origin,
        )))
    }
}

// ============================================================================
// Push parser
// ============================================================================

/// Push parser over [`Stream`]s, delivering triples, quads and prefixes.
pub struct StreamParser {
    decl: ParserDecl,
    pub probe: Probe,
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            decl: ParserDecl::new("stream")
                .source_of::<Stream>()
                .syntax("text/x-toy")
                .triples(TypeKey::of::<Triple>())
                .quads(TypeKey::of::<Quad>()),
            probe: Probe::default(),
        }
    }
}

impl PushParser for StreamParser {
    fn decl(&self) -> &ParserDecl {
        &self.decl
    }

    fn parse(&self, source: BoxObject, listener: &mut dyn RdfListener) -> Result<(), RdfItError> {
        let stream = source
            .downcast_ref::<Stream>()
            .ok_or_else(|| RdfItError::Parse("expected a stream".into()))?;
        self.probe.running.store(true, Ordering::SeqCst);
        let result = (|| -> Result<(), RdfItError> {
            for line in stream.0.lines() {
                match parse_line(line)? {
                    Line::Triple(t) => listener.on_triple(Box::new(t))?,
                    Line::Quad(q) => listener.on_quad(Box::new(q))?,
                    Line::Prefix(p, iri) => listener.on_prefix(&p, &iri)?,
                    Line::Blank => continue,
                }
                self.probe.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })();
        self.probe.running.store(false, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Converters, normalizers, context
// ============================================================================

pub fn triple_to_statement() -> FnConverter<Triple, Statement> {
    FnConverter::new("triple-to-statement", |t: &Triple| {
        Ok(Statement(format!("{} {} {} .", t.s, t.p, t.o)))
    })
}

pub fn statement_to_triple() -> FnConverter<Statement, Triple> {
    FnConverter::new("statement-to-triple", |s: &Statement| {
        let tokens: Vec<&str> = s.0.trim_end_matches(" .").split(' ').collect();
        match tokens.as_slice() {
            [s, p, o] => Ok(Triple::new(s, p, o)),
            _ => Err(ConvertError::Failed(format!("malformed statement {:?}", s.0))),
        }
    })
}

pub fn quad_to_triple() -> FnConverter<Quad, Triple> {
    FnConverter::new("quad-to-triple", |q: &Quad| Ok(q.triple.clone()))
}

/// Resolves [`Named`] sources from a fixed in-memory table.
pub fn named_documents(table: &[(&'static str, &'static str)]) -> FnNormalizer<Named> {
    let table: Vec<(&'static str, &'static str)> = table.to_vec();
    FnNormalizer::new("named-documents", move |named: Named| {
        table
            .iter()
            .find(|(name, _)| *name == named.0)
            .map(|(_, body)| Box::new(Document(body.to_string())) as BoxObject)
            .ok_or_else(|| RdfItError::Parse(format!("unknown document {}", named.0)))
    })
}

/// Context with the document pull parser, the stream push parser and the
/// triple/statement converters installed.
pub fn toy_rit() -> (Rit, Probe, Probe) {
    init_logging();
    let rit = Rit::new();
    let docs = DocumentParser::triples();
    let doc_probe = docs.probe.clone();
    let stream = StreamParser::new();
    let stream_probe = stream.probe.clone();
    rit.register_pull_parser(docs);
    rit.register_push_parser(stream);
    rit.register_converter(triple_to_statement());
    rit.register_converter(statement_to_triple());
    rit.register_converter(quad_to_triple());
    (rit, doc_probe, stream_probe)
}

pub fn boxed<T: rhi_rdfit_core::Object>(value: T) -> BoxObject {
    Box::new(value)
}

/// Drain `it`, collecting values as `T`.
pub fn collect<T: Clone + 'static>(it: &mut dyn RdfIt) -> Result<Vec<T>, RdfItError> {
    let mut out = Vec::new();
    while it.has_next()? {
        let value = it.next_value()?;
        out.push(
            value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(RdfItError::UnexpectedType {
                    expected: TypeKey::of::<T>(),
                    found: (*value).type_key(),
                })?,
        );
    }
    Ok(out)
}

/// Listener recording every event as a string.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<String>,
    pub continue_on_error: bool,
    pub want_statements: bool,
    pub stop_after: Option<usize>,
    pub records: usize,
}

impl RdfListener for Recorder {
    fn triple_type(&self) -> TypeKey {
        if self.want_statements {
            TypeKey::of::<Statement>()
        } else {
            TypeKey::any()
        }
    }

    fn on_start(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        self.events.push(format!("start {}", source.description));
        Ok(())
    }

    fn on_triple(&mut self, triple: BoxObject) -> Result<(), RdfItError> {
        if let Some(t) = triple.downcast_ref::<Triple>() {
            self.events.push(format!("triple {} {} {}", t.s, t.p, t.o));
        } else if let Some(s) = triple.downcast_ref::<Statement>() {
            self.events.push(format!("statement {}", s.0));
        }
        self.records += 1;
        if self.stop_after == Some(self.records) {
            return Err(RdfItError::Interrupted);
        }
        Ok(())
    }

    fn on_quad(&mut self, quad: BoxObject) -> Result<(), RdfItError> {
        if let Some(q) = quad.downcast_ref::<Quad>() {
            self.events.push(format!("quad {} in {}", q.triple.s, q.graph));
        }
        Ok(())
    }

    fn on_prefix(&mut self, prefix: &str, iri: &str) -> Result<(), RdfItError> {
        self.events.push(format!("prefix {prefix} {iri}"));
        Ok(())
    }

    fn on_source_error(&mut self, _source: &SourceInfo, error: &RdfItError) -> bool {
        self.events.push(format!("error {error}"));
        self.continue_on_error
    }

    fn on_finish_source(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        self.events.push(format!("finish {}", source.description));
        Ok(())
    }

    fn on_finish(&mut self) -> Result<(), RdfItError> {
        self.events.push("done".into());
        Ok(())
    }
}
