//! Schema command implementation.

use colored::Colorize;
use ignition_core::config::{CLUSTER_FIELDS, FieldKind};

/// Prints every cluster parameter field with its default.
pub fn execute() {
    println!("{}", "Cluster parameters".bold().cyan());
    println!();
    for field in CLUSTER_FIELDS {
        let required = if field.required { "required".yellow() } else { "optional".dimmed() };
        println!("  {} ({})", field.key.bold(), required);
        println!("    {}", field.label);
        println!("    {}", field.help.dimmed());
        if let FieldKind::Choice(options) = field.kind {
            println!("    choices: {}", options.join(", "));
        }
        match field.default_value() {
            Some(default) => println!("    default: {}", default.green()),
            None => println!("    default: {}", "-".dimmed()),
        }
    }
}
