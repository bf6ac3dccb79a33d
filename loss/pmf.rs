use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Dimension, s};

/// Side on which [`pad_col`] inserts the constant column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadSide {
    Start,
    #[default]
    End,
}

/// Adds a constant column to a `[batch, K]` matrix, giving `[batch, K + 1]`.
pub fn pad_col(input: ArrayView2<'_, f64>, value: f64, side: PadSide) -> Array2<f64> {
    let (rows, cols) = input.dim();
    let mut out = Array2::from_elem((rows, cols + 1), value);
    let target = match side {
        PadSide::Start => s![.., 1..],
        PadSide::End => s![.., ..cols],
    };
    out.slice_mut(target).assign(&input);
    out
}

/// Softmax over `[phi, 0]`: `[batch, K + 1]`, every row sums to one and the last
/// column holds the mass beyond the final bin.
pub fn pmf_from_logits(phi: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut pmf = pad_col(phi, 0.0, PadSide::End);
    pmf.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let gamma = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
            row.mapv_inplace(|v| (v - gamma).exp());
            let total = row.sum();
            row /= total;
        });
    pmf
}

/// Joint softmax over the flattened `R * K` logits of each sample plus a zero
/// logit, with the padding mass dropped: `[batch, R, K]`.
pub fn pmf_from_logits_cr(phi: ArrayView3<'_, f64>) -> Array3<f64> {
    let mut pmf = Array3::<f64>::zeros(phi.raw_dim());
    pmf.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(phi.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut out, logits)| {
            let shift = padded_shift(logits.view());
            let total = padded_partition(logits.view(), shift);
            out.zip_mut_with(&logits, |p, &v| *p = (v - shift).exp() / total);
        });
    pmf
}

/// Row maximum including the implicit zero logit.
pub(crate) fn padded_shift<D: Dimension>(logits: ndarray::ArrayView<'_, f64, D>) -> f64 {
    logits.fold(0.0f64, |acc, &v| acc.max(v))
}

/// `sum(exp(logits - shift)) + exp(-shift)`.
pub(crate) fn padded_partition<D: Dimension>(
    logits: ndarray::ArrayView<'_, f64, D>,
    shift: f64,
) -> f64 {
    logits.fold((-shift).exp(), |acc, &v| acc + (v - shift).exp())
}

/// Indicator matrix with a single one per row at `idx[i]`.
pub(crate) fn one_hot(idx: ArrayView1<'_, usize>, width: usize) -> Array2<f64> {
    Array2::from_shape_fn((idx.len(), width), |(i, k)| {
        if idx[i] == k { 1.0 } else { 0.0 }
    })
}

/// Cumulative sum along the last axis.
pub(crate) fn cumsum_last_axis<D: Dimension>(values: &mut ndarray::Array<f64, D>) {
    let last = Axis(values.ndim() - 1);
    values.accumulate_axis_inplace(last, |&prev, curr| *curr += prev);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    #[test]
    fn pad_col_both_sides() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(
            pad_col(x.view(), 0.0, PadSide::End),
            array![[1.0, 2.0, 0.0], [3.0, 4.0, 0.0]]
        );
        assert_eq!(
            pad_col(x.view(), -1.0, PadSide::Start),
            array![[-1.0, 1.0, 2.0], [-1.0, 3.0, 4.0]]
        );
    }

    #[test]
    fn pmf_rows_are_distributions() {
        let phi = array![[0.0, 0.0, 0.0], [800.0, -3.0, 2.0]];
        let pmf = pmf_from_logits(phi.view());
        assert_eq!(pmf.dim(), (2, 4));
        for row in pmf.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
        assert_abs_diff_eq!(pmf[[0, 3]], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(pmf[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn competing_pmf_leaves_room_for_padding() {
        let phi = Array::zeros((1, 2, 3));
        let pmf = pmf_from_logits_cr(phi.view());
        assert_eq!(pmf.dim(), (1, 2, 3));
        assert_abs_diff_eq!(pmf.sum(), 6.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn cumulative_sum_runs_along_rows() {
        let mut x = array![[1.0, 2.0, 3.0], [0.5, 0.5, 0.0]];
        cumsum_last_axis(&mut x);
        assert_eq!(x, array![[1.0, 3.0, 6.0], [0.5, 1.0, 1.0]]);
        assert_eq!(
            one_hot(array![2, 0].view(), 3),
            array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]
        );
    }
}
