//! Output formatting

use sqlvein_core::{EnhancedLineage, JsonLinesSink, ProcedureLineageResult, Severity};

use crate::args::OutputFormat;

/// Output formatter for lineage results
pub struct OutputFormatter {
    format: OutputFormat,
    file_name: String,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, file_name: String) -> Self {
        Self { format, file_name }
    }

    /// Print enhanced lineage for one statement
    pub fn print_enhanced(&self, lineage: &EnhancedLineage) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_enhanced_human(lineage);
                Ok(())
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(lineage).unwrap());
                Ok(())
            }
            OutputFormat::JsonLines => {
                let stdout = std::io::stdout();
                let mut sink = JsonLinesSink::new(stdout.lock());
                lineage.emit(&mut sink)
            }
        }
    }

    /// Print the result of one procedure run
    pub fn print_procedure(&self, result: &ProcedureLineageResult) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_procedure_human(result);
                Ok(())
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(result).unwrap());
                Ok(())
            }
            OutputFormat::JsonLines => {
                let stdout = std::io::stdout();
                let mut sink = JsonLinesSink::new(stdout.lock());
                result.emit(&mut sink)
            }
        }
    }

    fn print_enhanced_human(&self, lineage: &EnhancedLineage) {
        println!("{}", self.file_name);
        println!("  output: {}", lineage.out_table);
        for table in &lineage.in_tables {
            if *table != lineage.out_table {
                println!("  input:  {}", table);
            }
        }

        for column in &lineage.columns {
            println!("  column: {}", column.downstream_column);
            if let Some(transform) = &column.transform {
                println!("    {}", transform);
            }
            for upstream in &column.upstreams {
                println!("    <- {}", upstream);
            }
        }

        for issue in &lineage.issues {
            let label = match issue.severity {
                Severity::Warning => "warning",
                Severity::Info => "info",
            };
            eprintln!("  {}: {}", label, issue.message);
        }
        println!();
    }

    fn print_procedure_human(&self, result: &ProcedureLineageResult) {
        println!("flow: {} ({} nodes)", result.flow.name, result.nodes.len());
        for record in &result.nodes {
            let node = &record.node;
            println!("  [{}] {}", node.sequence, node.kind);
            if !node.created_temp_tables.is_empty() {
                println!("    creates: {}", node.created_temp_tables.join(", "));
            }
            if !node.consumed_temp_tables.is_empty() {
                println!("    reads:   {}", node.consumed_temp_tables.join(", "));
            }
            if let Some(error) = &record.error {
                println!("    error: {}", error);
            }
            if let Some(lineage) = &record.lineage {
                println!("    output: {}", lineage.out_table);
                for column in &lineage.columns {
                    if let Some(transform) = &column.transform {
                        println!("    {}: {}", column.downstream_column, transform);
                    }
                }
            }
        }
    }
}
