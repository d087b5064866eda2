use crate::core::NodeValue;

/// Declaration of one actor input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSignature {
    pub type_name: Option<String>,
    pub nullable: bool,
    pub optional: bool,
    pub default_value: Option<NodeValue>,
    /// Whether the input accepts a value at the start of each step.
    pub default_enabled: bool,
    pub(crate) implicit: bool,
}

impl Default for InputSignature {
    fn default() -> Self {
        Self {
            type_name: None,
            nullable: false,
            optional: false,
            default_value: None,
            default_enabled: true,
            implicit: false,
        }
    }
}

impl InputSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Value applied at initialization unless something else was staged first.
    pub fn with_default(mut self, value: NodeValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }

    pub(crate) fn implicit() -> Self {
        Self {
            implicit: true,
            ..Self::default()
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}

/// Declaration of one actor output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSignature {
    pub type_name: Option<String>,
    pub nullable: bool,
    pub default_enabled: bool,
    pub(crate) implicit: bool,
}

impl Default for OutputSignature {
    fn default() -> Self {
        Self {
            type_name: None,
            nullable: false,
            default_enabled: true,
            implicit: false,
        }
    }
}

impl OutputSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }

    pub(crate) fn implicit() -> Self {
        Self {
            implicit: true,
            ..Self::default()
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}
