//! Shared builtin/method name tables (spec.md §4.2 "Builtin whitelist").
//!
//! Used by both the code front-end (to disambiguate a bare call statement
//! between a builtin expression and a `Step::Tool` dispatch) and the
//! interpreter (to dispatch builtin/method calls).

pub const BUILTIN_FUNCTION_NAMES: &[&str] = &[
    "len", "str", "repr", "bool", "int", "float", "type", "list", "tuple", "set", "dict", "range",
    "enumerate", "zip", "reversed", "sorted", "sum", "min", "max", "abs", "divmod", "any", "all",
    "hash", "dir",
];

pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTION_NAMES.contains(&name)
}

pub const STRING_METHODS: &[&str] = &[
    "lower",
    "upper",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "rsplit",
    "splitlines",
    "replace",
    "format",
    "startswith",
    "endswith",
    "find",
    "rfind",
    "index",
    "rindex",
    "count",
    "partition",
    "rpartition",
    "join",
    "capitalize",
    "title",
    "islower",
    "isupper",
    "istitle",
    "isdigit",
    "isalpha",
    "isalnum",
    "isspace",
    "removeprefix",
    "removesuffix",
];

pub const LIST_METHODS: &[&str] = &["index", "count"];

pub const DICT_METHODS: &[&str] = &["get", "keys", "values", "items"];
