// Parser for ansible-playbook run output

pub mod ast;
pub mod format;
pub mod grammar;
pub mod log;

pub use ast::{
    LogNode, ParsedLog, PlayNode, RecapNode, RecapRow, ResultLine, ResultStatus, StatusCounts,
    TaskNode,
};
pub use format::{format_recap_row, format_result, render_plain};
pub use grammar::{classify, LineKind};
pub use log::parse_output;
