//! Errors surfaced by the VM layer.

use randomvm_derive::Error;

/// Errors produced while loading a program.
///
/// Execution itself is total: every opcode byte resolves to a kind and
/// every kind has a defined effect.
#[derive(Debug, Error)]
pub enum VmError {
    /// A raw program buffer had the wrong size.
    #[error("program buffer is {actual} bytes, expected {expected}")]
    ProgramLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_length_message_names_both_sizes() {
        let err = VmError::ProgramLength {
            expected: 2176,
            actual: 16,
        };
        assert!(err.to_string().contains("2176"));
        assert!(err.to_string().contains("16"));
    }
}
