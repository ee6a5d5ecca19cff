// Property-based tests harness
mod strategies;
mod stack {
    include!("stack.rs");
}
mod branches {
    include!("branches.rs");
}
