pub(crate) mod bittab;

/// A trait for types having a constant default value, usable for initializing
/// pool arrays in a `const` context.
pub(crate) trait Init {
    const INIT: Self;
}
