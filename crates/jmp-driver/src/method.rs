use std::collections::BTreeMap;

/// Tag of an exported operation. This is an invariant of the operation fixed at registration
/// time, not a property of any particular call — the dispatcher looks it up in the table rather
/// than inspecting the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTag {
    Unary,
    ServerStream,
    ByteStream,
}

/// Static per-driver table of exported operations, built once when the driver instance is
/// constructed.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    tags: BTreeMap<String, MethodTag>,
    help: BTreeMap<String, String>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unary(self, name: impl Into<String>) -> Self {
        self.tagged(name, MethodTag::Unary)
    }

    pub fn server_stream(self, name: impl Into<String>) -> Self {
        self.tagged(name, MethodTag::ServerStream)
    }

    pub fn byte_stream(self, name: impl Into<String>) -> Self {
        self.tagged(name, MethodTag::ByteStream)
    }

    fn tagged(mut self, name: impl Into<String>, tag: MethodTag) -> Self {
        self.tags.insert(name.into(), tag);
        self
    }

    pub fn help(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.help.insert(name.into(), text.into());
        self
    }

    pub fn tag_of(&self, name: &str) -> Option<MethodTag> {
        self.tags.get(name).copied()
    }

    pub fn descriptions(&self) -> &BTreeMap<String, String> {
        &self.help
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_declared_tag() {
        let table = MethodTable::new().unary("on").server_stream("read");
        assert_eq!(table.tag_of("on"), Some(MethodTag::Unary));
        assert_eq!(table.tag_of("read"), Some(MethodTag::ServerStream));
        assert_eq!(table.tag_of("missing"), None);
    }
}
