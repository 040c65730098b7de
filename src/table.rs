use std::fmt::Write as _;

/// Horizontal alignment of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Right,
}

/// A plain-text grid for terminal diagnostics: a header, a dashed rule, then
/// one line per row with columns separated by two spaces.
#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    align: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers = headers.into_iter().map(Into::into).collect::<Vec<String>>();
        let align = vec![Align::Left; headers.len()];
        Self {
            headers,
            align,
            rows: Vec::new(),
        }
    }

    /// Right-aligns every column whose header is in `columns`.
    pub fn align_right(mut self, columns: &[&str]) -> Self {
        for (idx, header) in self.headers.iter().enumerate() {
            if columns.contains(&header.as_str()) {
                self.align[idx] = Align::Right;
            }
        }
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut widths = self
            .headers
            .iter()
            .map(|header| header.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(flatten(cell).chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", self.line(&self.headers, &widths));
        let rule = widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", self.line(&rule, &widths));
        for row in &self.rows {
            let _ = writeln!(output, "{}", self.line(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn line(&self, cells: &[String], widths: &[usize]) -> String {
        let mut line = String::new();
        for (idx, &width) in widths.iter().enumerate() {
            if idx > 0 {
                line.push_str("  ");
            }
            let cell = cells.get(idx).map(|cell| flatten(cell)).unwrap_or_default();
            match self.align.get(idx).copied().unwrap_or_default() {
                Align::Left => {
                    let _ = write!(line, "{cell:<width$}");
                }
                Align::Right => {
                    let _ = write!(line, "{cell:>width$}");
                }
            }
        }
        line.trim_end().to_string()
    }
}

/// Keeps every cell on one line.
fn flatten(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}
