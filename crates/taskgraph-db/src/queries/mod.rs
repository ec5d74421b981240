//! Database query functions against the `tasks` and `task_dependencies`
//! tables.

pub mod tasks;
