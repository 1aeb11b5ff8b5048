//! Classes every program can name without declaring them.
//!
//! The compiler resolves type references against this table and the
//! runtime builds its built-in metaclasses from it, so the two agree on
//! the hierarchy.

/// `(name, superclass)` pairs, parents before children. Only `Object`
/// has no superclass.
pub const BUILTIN_CLASSES: &[(&str, Option<&str>)] = &[
    ("Object", None),
    ("NullObject", Some("Object")),
    ("Boolean", Some("Object")),
    ("Number", Some("Object")),
    ("Integer", Some("Number")),
    ("Float", Some("Number")),
    ("String", Some("Object")),
    ("List", Some("Object")),
    ("Closure", Some("Object")),
    ("Matcher", Some("Object")),
    ("Class", Some("Object")),
    ("Throwable", Some("Object")),
    ("Exception", Some("Throwable")),
    ("RuntimeException", Some("Exception")),
    ("ArithmeticException", Some("RuntimeException")),
    ("MissingMethodException", Some("RuntimeException")),
    ("MissingPropertyException", Some("RuntimeException")),
    ("NullPointerException", Some("RuntimeException")),
    ("ClassCastException", Some("RuntimeException")),
    ("IllegalArgumentException", Some("RuntimeException")),
    ("IllegalStateException", Some("RuntimeException")),
    ("Error", Some("Throwable")),
    ("StackOverflowError", Some("Error")),
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_CLASSES.iter().any(|(n, _)| *n == name)
}

pub fn builtin_superclass(name: &str) -> Option<&'static str> {
    BUILTIN_CLASSES
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, sup)| *sup)
}

/// Primitive spellings accepted in type positions and the class they
/// stand for.
pub fn primitive_class(name: &str) -> Option<&'static str> {
    Some(match name {
        "int" | "long" | "short" | "byte" => "Integer",
        "double" | "float" => "Float",
        "boolean" => "Boolean",
        "char" => "String",
        "def" | "void" => "Object",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_come_first() {
        for (i, (name, sup)) in BUILTIN_CLASSES.iter().enumerate() {
            if let Some(sup) = sup {
                let parent = BUILTIN_CLASSES[..i].iter().position(|(n, _)| n == sup);
                assert!(parent.is_some(), "{name} listed before {sup}");
            }
        }
    }

    #[test]
    fn lookups() {
        assert!(is_builtin("MissingMethodException"));
        assert!(!is_builtin("Widget"));
        assert_eq!(builtin_superclass("Integer"), Some("Number"));
        assert_eq!(builtin_superclass("Object"), None);
        assert_eq!(primitive_class("int"), Some("Integer"));
        assert_eq!(primitive_class("Integer"), None);
    }
}
