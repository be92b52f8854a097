//! Cross-cutting manager tests: subscriber ordering, multi-manager
//! convergence through a shared backend, and deadline behavior.

mod ordering_tests;
