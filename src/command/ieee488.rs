//! IEEE-488.2 common-command table.
//!
//! Shared by the Lakeshore drivers, which merge it into their registries by
//! composition (see [`crate::command::registry::CommandRegistry::from_tables`]).

use anyhow::Result;

use crate::command::descriptor::{parse_i64, validate_int_range, CommandDescriptor};

fn validate_register_mask(pars: &[String]) -> Result<()> {
    validate_int_range(&pars[0], 0, 255)
}

/// The IEEE-488.2 common commands every 488.2 instrument understands.
///
/// `*TST?` is registered write-kind: the self-test is fired without reading
/// the result back in the same transaction.
pub static IEEE488_COMMON: &[CommandDescriptor] = &[
    CommandDescriptor::write("*CLS"),
    CommandDescriptor::write("*ESE")
        .with_args("{}")
        .with_validator(validate_register_mask),
    CommandDescriptor::query("*ESE?").with_parser(parse_i64),
    CommandDescriptor::query("*ESR?").with_parser(parse_i64),
    CommandDescriptor::query("*IDN?"),
    CommandDescriptor::write("*OPC"),
    CommandDescriptor::query("*OPC?").with_parser(parse_i64),
    CommandDescriptor::write("*RST"),
    CommandDescriptor::write("*SRE")
        .with_args("{}")
        .with_validator(validate_register_mask),
    CommandDescriptor::query("*SRE?").with_parser(parse_i64),
    CommandDescriptor::query("*STB?").with_parser(parse_i64),
    CommandDescriptor::write("*TST?"),
    CommandDescriptor::write("*WAI"),
];
