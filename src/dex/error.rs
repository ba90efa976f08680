use std::fmt;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        DexError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}

#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub fn new(msg: &str) -> Self
    {
        DexError {
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { msg: base.msg, contexts }
    }

    /// The innermost message, without any context.
    pub fn message(&self) -> &str
    {
        &self.msg
    }

    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_display()
    {
        let base = DexError::new("String not interned: foo");
        let e = DexError::with_context(base, "method La;->b()V".to_string());
        let e = DexError::with_context(e, "class La;".to_string());
        assert_eq!(e.to_string(), "String not interned: foo for method La;->b()V of class La;");
        assert_eq!(e.message(), "String not interned: foo");
        assert_eq!(e.contexts().len(), 2);
    }

    #[test]
    fn test_macros()
    {
        fn failing(n: u32) -> Result<(), DexError>
        {
            fail!("bad value {}", n);
        }
        let e = failing(7).unwrap_err();
        assert_eq!(e.to_string(), "bad value 7");

        let wrapped = err!(e, "while reading {}", "x");
        assert_eq!(wrapped.to_string(), "bad value 7 for while reading x");
    }
}
