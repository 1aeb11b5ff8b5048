//! Compilation inputs.
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytecode::GeneratedClass;
use parser::ast::Module;

use crate::message::{Message, MessageKind};
use crate::phase::Phase;
use crate::select::SelectedClass;

/// Where a source unit's text comes from.
pub trait ReaderSource: Send {
    fn name(&self) -> &str;

    fn reader(&self) -> io::Result<Box<dyn Read>>;

    /// Line `n` (1-based) of the text, for rendering diagnostics.
    fn line(&self, n: usize) -> Option<String> {
        let reader = BufReader::new(self.reader().ok()?);
        reader.lines().nth(n.checked_sub(1)?)?.ok()
    }
}

pub struct StringReaderSource {
    name: String,
    text: Arc<str>,
}

impl StringReaderSource {
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl ReaderSource for StringReaderSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn reader(&self) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(Cursor::new(ArcBytes(self.text.clone()))))
    }

    fn line(&self, n: usize) -> Option<String> {
        self.text.lines().nth(n.checked_sub(1)?).map(str::to_string)
    }
}

struct ArcBytes(Arc<str>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

pub struct FileReaderSource {
    name: String,
    path: PathBuf,
}

impl FileReaderSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReaderSource for FileReaderSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn reader(&self) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(BufReader::new(fs::File::open(&self.path)?)))
    }
}

/// One compilable input and everything the phases derive from it.
pub struct SourceUnit {
    name: Arc<str>,
    /// Script class name derived from the source name.
    script_name: Arc<str>,
    source: Box<dyn ReaderSource>,
    pub(crate) ast: Option<Module>,
    pub(crate) messages: Vec<Message>,
    /// Messages already forwarded to the collector.
    pub(crate) reported: usize,
    /// Fully qualified names of the classes declared by this unit.
    pub(crate) classes: Vec<Arc<str>>,
    /// Bodies produced by instruction selection, per class.
    pub(crate) selected: Vec<SelectedClass>,
    pub(crate) generated: Vec<GeneratedClass>,
    pub(crate) completed: Option<Phase>,
}

impl fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceUnit")
            .field("name", &self.name)
            .field("messages", &self.messages.len())
            .field("completed", &self.completed)
            .finish()
    }
}

impl SourceUnit {
    pub fn new(source: Box<dyn ReaderSource>) -> Self {
        let name: Arc<str> = source.name().into();
        let script_name = script_class_name(&name).into();
        Self {
            name,
            script_name,
            source,
            ast: None,
            messages: Vec::new(),
            reported: 0,
            classes: Vec::new(),
            selected: Vec::new(),
            generated: Vec::new(),
            completed: None,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn script_name(&self) -> &Arc<str> {
        &self.script_name
    }

    pub fn source(&self) -> &dyn ReaderSource {
        self.source.as_ref()
    }

    pub fn ast(&self) -> Option<&Module> {
        self.ast.as_ref()
    }

    pub fn ast_mut(&mut self) -> Option<&mut Module> {
        self.ast.as_mut()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(Message::is_error)
    }

    pub fn class_names(&self) -> &[Arc<str>] {
        &self.classes
    }

    pub fn generated(&self) -> &[GeneratedClass] {
        &self.generated
    }

    pub fn completed(&self) -> Option<Phase> {
        self.completed
    }

    pub fn add_error(&mut self, kind: MessageKind, span: Option<parser::Span>, text: impl Into<String>) {
        let msg = Message::error(kind, self.name.clone(), span, text);
        self.messages.push(msg);
    }

    pub fn add_warning(&mut self, kind: MessageKind, span: Option<parser::Span>, text: impl Into<String>) {
        let msg = Message::warning(kind, self.name.clone(), span, text);
        self.messages.push(msg);
    }

    pub(crate) fn take_new_messages(&mut self) -> Vec<Message> {
        let new = self.messages[self.reported..].to_vec();
        self.reported = self.messages.len();
        new
    }

    /// Run `f` with the unit's AST, failing with a bug when the unit has
    /// not been parsed.
    pub(crate) fn with_ast<T>(
        &mut self,
        f: impl FnOnce(&mut Module, &mut Vec<Message>, &Arc<str>) -> T,
    ) -> Result<T, crate::CompileError> {
        match self.ast.as_mut() {
            Some(ast) => Ok(f(ast, &mut self.messages, &self.name)),
            None => Err(crate::CompileError::bug(format!(
                "source unit `{}` has no AST",
                self.name
            ))),
        }
    }
}

/// `dir/my-script.kst` becomes `my_script`.
pub fn script_class_name(source_name: &str) -> String {
    let file = source_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_name);
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(i) => &file[..i],
    };
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_source_lines() {
        let s = StringReaderSource::new("a.kst", "one\ntwo\nthree");
        assert_eq!(s.line(2).as_deref(), Some("two"));
        assert_eq!(s.line(0), None);
        assert_eq!(s.line(4), None);
        let mut text = String::new();
        s.reader().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "one\ntwo\nthree");
    }

    #[test]
    fn missing_file_fails_on_read() {
        let s = FileReaderSource::new("/definitely/not/here.kst");
        assert_eq!(s.name(), "/definitely/not/here.kst");
        assert!(s.reader().is_err());
        assert_eq!(s.line(1), None);
    }

    #[test]
    fn script_names() {
        assert_eq!(script_class_name("scripts/hello-world.kst"), "hello_world");
        assert_eq!(script_class_name("Main.kst"), "Main");
        assert_eq!(script_class_name("1st.kst"), "_1st");
        assert_eq!(script_class_name("plain"), "plain");
    }
}
