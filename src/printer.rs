use std::io::{BufWriter, Write};
use std::net::TcpStream;

use anyhow::Result;
use heapdb::tuple::schema::{Schema, TypeId};
use heapdb::tuple::Tuple;

/// Prints tuples as a table with one right-aligned column per schema column.
pub struct Printer<'a> {
    schema: &'a Schema,
    column_widths: Vec<usize>,
}

impl<'a> Printer<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        let mut column_widths = vec![];
        for col in schema.columns() {
            let col_name_size = col.column_name().unwrap_or_default().chars().count();
            let col_width = match col.type_id() {
                TypeId::Integer => col_name_size.max(10),
                TypeId::Text => col_name_size.max(25),
            };
            column_widths.push(col_width);
        }

        Self {
            schema,
            column_widths,
        }
    }

    fn print_header(&self, writer: &mut BufWriter<&TcpStream>) -> Result<()> {
        let col_names = self
            .schema
            .columns()
            .iter()
            .map(|col| col.column_name().unwrap_or_default());
        let header = self
            .column_widths
            .iter()
            .zip(col_names)
            .map(|(width, name)| format!("{:>1$}", name, *width))
            .collect::<Vec<String>>()
            .join("|");
        writer.write_all(header.as_bytes())?;
        writer.write_all("\n".as_bytes())?;
        let separator_line = self
            .column_widths
            .iter()
            .map(|width| format!("{:-^1$}", '-', width))
            .collect::<Vec<String>>()
            .join("+");
        writer.write_all(separator_line.as_bytes())?;
        writer.write_all("\n".as_bytes())?;

        Ok(())
    }

    pub fn print_all_tuples(
        &self,
        tuples: &[Tuple],
        writer: &mut BufWriter<&TcpStream>,
    ) -> Result<()> {
        self.print_header(writer)?;

        for tuple in tuples {
            let line = self
                .column_widths
                .iter()
                .zip(tuple.values())
                .map(|(width, value)| format!("{:>1$}", value, *width))
                .collect::<Vec<String>>()
                .join("|");
            writer.write_all(line.as_bytes())?;
            writer.write_all("\n".as_bytes())?;
        }
        writer.write_all(format!("({} rows)", tuples.len()).as_bytes())?;

        Ok(())
    }
}
