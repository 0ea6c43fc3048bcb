//! Query engine (spec §4.8): boolean expression compiler, the plan
//! tree, the cost-light optimizer, and the execution façade.

pub mod exec;
pub mod expr;
pub mod optimizer;
pub mod plan;

pub use exec::Query;
pub use expr::{Expr, Op, UnaryOp};
pub use plan::{Aggregator, Field, JoinType, PlanNode, Record};
