//! Named, index-aligned columns and threshold selection over them.
//!
//! A [`Table`] keeps every per-star quantity of a run in one 2-D array, one
//! row per star, so that selecting rows can never pull two columns out of
//! alignment.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    names: Vec<String>,
    data: Array2<f64>,
}

impl Table {
    pub fn new(names: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if names.len() != data.ncols() {
            return Err(Error::format(format!(
                "{} column names for {} columns",
                names.len(),
                data.ncols()
            )));
        }

        for (i, n) in names.iter().enumerate() {
            if names[..i].contains(n) {
                return Err(Error::format(format!("duplicate column `{n}`")));
            }
        }

        Ok(Table { names, data })
    }

    /// Assemble a table from separate arrays. They must all have the same
    /// length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Array1<f64>)>,
        S: Into<String>,
    {
        let (names, arrays): (Vec<String>, Vec<Array1<f64>>) =
            columns.into_iter().map(|(n, a)| (n.into(), a)).unzip();

        let nrows = arrays.first().map(|a| a.len()).unwrap_or(0);

        for (n, a) in names.iter().zip(&arrays) {
            if a.len() != nrows {
                return Err(Error::format(format!(
                    "column `{}` has {} entries but `{}` has {}",
                    n,
                    a.len(),
                    names[0],
                    nrows
                )));
            }
        }

        let data = Array2::from_shape_fn((nrows, arrays.len()), |(i, j)| arrays[j][i]);
        Table::new(names, data)
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn data(&self) -> ArrayView2<f64> {
        self.data.view()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::Config(format!("no column named `{name}`")))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<f64>> {
        Ok(self.data.column(self.column_index(name)?))
    }

    /// Append a column. Its length must match the table's.
    pub fn push_column<S: Into<String>>(&mut self, name: S, values: Array1<f64>) -> Result<()> {
        let name = name.into();

        if values.len() != self.nrows() {
            return Err(Error::format(format!(
                "column `{}` has {} entries but the table has {} rows",
                name,
                values.len(),
                self.nrows()
            )));
        }

        if self.names.contains(&name) {
            return Err(Error::format(format!("duplicate column `{name}`")));
        }

        let col = values.insert_axis(Axis(1));
        self.data = concatenate(Axis(1), &[self.data.view(), col.view()])
            .map_err(|e| Error::format(e.to_string()))?;
        self.names.push(name);
        Ok(())
    }

    /// A new table holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            data: self.data.select(Axis(0), indices),
        }
    }

    pub fn select(&self, predicate: &Predicate) -> Result<Table> {
        Ok(self.take_rows(&select_indices(self, predicate)?))
    }

    /// Turn an empty table into a [`Error::SelectionEmpty`].
    pub fn require_rows(&self, what: &str) -> Result<()> {
        if self.nrows() == 0 {
            return Err(Error::SelectionEmpty(format!("no stars left after {what}")));
        }

        Ok(())
    }
}

/// An open interval on one column. A missing bound is unbounded. NaN never
/// satisfies a bounded range.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Range {
    pub column: String,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,
}

impl Range {
    pub fn below<S: Into<String>>(column: S, max: f64) -> Self {
        Range {
            column: column.into(),
            min: None,
            max: Some(max),
        }
    }

    pub fn between<S: Into<String>>(column: S, min: f64, max: f64) -> Self {
        Range {
            column: column.into(),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        self.min.map_or(true, |m| x > m) && self.max.map_or(true, |m| x < m)
    }
}

/// A conjunction of ranges.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Predicate {
    ranges: Vec<Range>,
}

impl Predicate {
    pub fn new(ranges: Vec<Range>) -> Self {
        Predicate { ranges }
    }

    pub fn and(mut self, range: Range) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }
}

/// Indices of the rows satisfying every range, in increasing order.
pub fn select_indices(table: &Table, predicate: &Predicate) -> Result<Vec<usize>> {
    let bound = predicate
        .ranges
        .iter()
        .map(|r| Ok((table.column_index(&r.column)?, r)))
        .collect::<Result<Vec<_>>>()?;

    Ok(table
        .data
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| bound.iter().all(|(j, r)| r.contains(row[*j])))
        .map(|(i, _)| i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stars() -> Table {
        Table::from_columns([
            ("vmag", array![18.0, 22.0, 19.5]),
            ("dist", array![1.0, 2.0, 3.0]),
        ])
        .unwrap()
    }

    #[test]
    fn magnitude_limit_keeps_order() {
        let t = stars();
        let pred = Predicate::default().and(Range::below("vmag", 20.0));

        assert_eq!(select_indices(&t, &pred).unwrap(), vec![0, 2]);

        let s = t.select(&pred).unwrap();
        assert_eq!(s.column("vmag").unwrap(), array![18.0, 19.5]);
        assert_eq!(s.column("dist").unwrap(), array![1.0, 3.0]);
    }

    #[test]
    fn selection_is_idempotent() {
        let t = Table::from_columns([
            ("dist", array![0.5, 14.9, 15.0, 16.0, -1.0, 7.0]),
            ("dist_err", array![0.01, 20.0, 0.1, 0.1, 0.1, 0.0005]),
        ])
        .unwrap();

        let pred = Predicate::new(vec![
            Range::between("dist", 0.0, 15.0),
            Range::between("dist_err", 0.001, 15.0),
        ]);

        let once = t.select(&pred).unwrap();
        let twice = once.select(&pred).unwrap();
        assert_eq!(once.nrows(), 1);
        assert_eq!(once, twice);
    }

    #[test]
    fn nan_never_passes_a_bound() {
        let t = Table::from_columns([("x", array![f64::NAN, 1.0])]).unwrap();
        let pred = Predicate::default().and(Range::below("x", 5.0));
        assert_eq!(select_indices(&t, &pred).unwrap(), vec![1]);
    }

    #[test]
    fn misaligned_columns_are_rejected() {
        let err = Table::from_columns([("a", array![1.0, 2.0]), ("b", array![1.0])]).unwrap_err();
        assert!(matches!(err, Error::Format(_)));

        let mut t = stars();
        assert!(matches!(
            t.push_column("c", array![1.0]),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            t.push_column("vmag", array![1.0, 2.0, 3.0]),
            Err(Error::Format(_))
        ));

        t.push_column("c", array![7.0, 8.0, 9.0]).unwrap();
        assert_eq!(t.ncols(), 3);
        assert_eq!(t.column("c").unwrap()[2], 9.0);
    }

    #[test]
    fn unknown_column_is_config_error() {
        let pred = Predicate::default().and(Range::below("nope", 1.0));
        assert!(matches!(
            select_indices(&stars(), &pred),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn empty_selection_is_reported() {
        let t = stars();
        let none = t
            .select(&Predicate::default().and(Range::below("vmag", 10.0)))
            .unwrap();
        assert_eq!(none.nrows(), 0);
        assert_eq!(none.ncols(), 2);
        assert!(matches!(
            none.require_rows("the magnitude cut"),
            Err(Error::SelectionEmpty(_))
        ));
    }

    #[test]
    fn predicate_deserializes_from_list() {
        let pred: Predicate =
            serde_json::from_str(r#"[{"column": "dist", "max": 15.0}, {"column": "e", "min": 0.001, "max": 15}]"#)
                .unwrap();
        assert_eq!(pred.ranges().len(), 2);
        assert_eq!(pred.ranges()[0], Range::below("dist", 15.0));
        assert_eq!(pred.ranges()[1], Range::between("e", 0.001, 15.0));
    }
}
