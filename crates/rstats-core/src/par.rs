//! Row-parallel fill, backed by rayon with the `threading` feature and a
//! plain loop without it. Output is identical either way.

/// Call `f(row, row_slice)` for every `width`-sized row of `out`.
pub(crate) fn fill_rows<T, F>(out: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    if width == 0 {
        return;
    }

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        out.par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, chunk)| f(row, chunk));
    }

    #[cfg(not(feature = "threading"))]
    out.chunks_mut(width)
        .enumerate()
        .for_each(|(row, chunk)| f(row, chunk));
}
