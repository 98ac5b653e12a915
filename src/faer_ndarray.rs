use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, Par, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Small, centralized dispatch policy:
    // - stay on ndarray for tiny products to avoid setup overhead,
    // - switch to faer GEMM for moderate+ sizes.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
fn matmul_par(m: usize, n: usize, k: usize) -> Par {
    if m < 128 || n < 128 || k < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

/// Borrowed faer view over an ndarray matrix.
///
/// Layouts with non-positive strides can alias or reverse memory traversal,
/// which violates assumptions in faer kernels; for those we materialize a
/// compact owned copy instead of handing faer the raw view.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides either come directly from a live ndarray
        // view with positive strides, or from an owned compact copy stored inside
        // this wrapper, which guarantees validity for the returned view lifetime.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

/// Compute A^T * A using faer's SIMD-optimized GEMM.
/// For a matrix A of shape (n, p), this computes the (p, p) result.
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();

    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }

    let mut result = Mat::<f64>::zeros(p, p);

    let a_view = FaerArrayView::new(a);
    let a_ref = a_view.as_ref();

    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        matmul_par(p, p, n),
    );

    mat_to_array(result.as_ref())
}

/// Compute A^T * B using faer's SIMD-optimized GEMM.
/// For A of shape (n, p) and B of shape (n, q), this computes the (p, q) result.
#[inline]
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n_a, p) = a.dim();
    let (n_b, q) = b.dim();
    debug_assert_eq!(n_a, n_b, "A and B must have same number of rows");

    if !should_use_faer_matmul(p, q, n_a) {
        return a.t().dot(b);
    }

    let mut result = Mat::<f64>::zeros(p, q);

    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);

    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        b_view.as_ref(),
        1.0,
        matmul_par(p, q, n_a),
    );

    mat_to_array(result.as_ref())
}

/// Compute A * B using faer's SIMD-optimized GEMM.
/// For A of shape (n, p) and B of shape (p, q), this computes the (n, q) result.
#[inline]
pub fn fast_ab<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    use faer::Accum;
    use faer::linalg::matmul::matmul;

    let (n, p) = a.dim();
    let (p_b, q) = b.dim();
    debug_assert_eq!(p, p_b, "A and B must have compatible inner dimensions");

    if !should_use_faer_matmul(n, q, p) {
        return a.dot(b);
    }

    let mut result = Mat::<f64>::zeros(n, q);

    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);

    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        b_view.as_ref(),
        1.0,
        matmul_par(n, q, p),
    );

    mat_to_array(result.as_ref())
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Thin singular value decomposition via faer.
///
/// Returns (U, s, V^T) with U of shape (rows, r), s of length r and V^T of
/// shape (r, cols), where r = min(rows, cols). Singular values are ordered
/// non-increasing.
pub trait FaerThinSvd {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerThinSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let faer_mat = faer_view.as_ref();
        let (rows, cols) = faer_mat.shape();
        let size = rows.min(cols);

        let mut singular = Diag::<f64>::zeros(size);
        let mut u_storage = Mat::<f64>::zeros(rows, size);
        let mut v_storage = Mat::<f64>::zeros(cols, size);

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::Thin,
            ComputeSvdVectors::Thin,
            par,
            Default::default(),
        ));
        let stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            Some(u_storage.as_mut()),
            Some(v_storage.as_mut()),
            par,
            stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        let singular_values = diag_to_array(singular.as_ref());
        let u = mat_to_array(u_storage.as_ref());
        let v_ref = v_storage.as_ref();
        let mut vt = Array2::<f64>::zeros((size, cols));
        for j in 0..v_ref.nrows() {
            for i in 0..v_ref.ncols() {
                vt[[i, j]] = v_ref[(j, i)];
            }
        }

        Ok((u, singular_values, vt))
    }
}

#[cfg(test)]
mod tests {
    use super::{FaerThinSvd, fast_ab, fast_ata, fast_atb};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn fast_products_match_ndarray() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let b = array![[1.0, 0.5], [-1.0, 2.0], [0.0, 1.0]];
        let ata = fast_ata(&a);
        let atb = fast_atb(&a, &b);
        let ab = fast_ab(&a.t().to_owned(), &b);
        assert_abs_diff_eq!(ata, a.t().dot(&a), epsilon = 1e-12);
        assert_abs_diff_eq!(atb, a.t().dot(&b), epsilon = 1e-12);
        assert_abs_diff_eq!(ab, a.t().dot(&b), epsilon = 1e-12);
    }

    #[test]
    fn thin_svd_reconstructs_tall_matrix() {
        let a = array![
            [2.0, 0.0],
            [0.0, -3.0],
            [1.0, 1.0],
            [0.5, -0.5],
            [0.0, 0.25]
        ];
        let (u, s, vt) = a.thin_svd().expect("svd");
        assert_eq!(u.dim(), (5, 2));
        assert_eq!(s.len(), 2);
        assert_eq!(vt.dim(), (2, 2));
        assert!(s[0] >= s[1] && s[1] >= 0.0);

        let mut recon = Array2::<f64>::zeros((5, 2));
        for k in 0..2 {
            for i in 0..5 {
                for j in 0..2 {
                    recon[[i, j]] += u[[i, k]] * s[k] * vt[[k, j]];
                }
            }
        }
        assert_abs_diff_eq!(recon, a, epsilon = 1e-10);
    }

    #[test]
    fn thin_svd_handles_reversed_stride_views() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let flipped = a.slice(ndarray::s![..;-1, ..]);
        let (_, s_flipped, _) = flipped.thin_svd().expect("svd");
        let (_, s_plain, _) = a.thin_svd().expect("svd");
        // Row permutation leaves singular values unchanged.
        assert_abs_diff_eq!(s_flipped, s_plain, epsilon = 1e-10);
    }
}
