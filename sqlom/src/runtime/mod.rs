pub mod executor;
pub mod memory;

pub use executor::{
    Aggregate, AggregateFn, BindValue, CmpOp, Condition, DeleteStatement, InsertStatement, Join,
    JoinKind, Row, SelectStatement, SortOrder, SqlExecutor, SqlValue, UpdateStatement, WriteOutcome,
    WriteValue,
};
pub use memory::MemoryExecutor;
