use std::ops::Index;

use tch::{nn::VarStore, Tensor};

use crate::error::{Error, Result};

/// Resets the accumulated gradient of every trainable variable in `vs`.
pub fn zero(vs: &VarStore) {
    for mut var in vs.trainable_variables() {
        var.zero_grad();
    }
}

/// Per-parameter gradient tensors of one model, ordered like
/// `VarStore::trainable_variables`.
#[derive(Debug)]
pub struct Gradients(Vec<Tensor>);

impl Gradients {
    /// Deep copy of the live gradients of `vs`, detached from the graph so that
    /// a later `zero` does not touch it. Variables without a gradient yet
    /// snapshot as zeros.
    #[must_use]
    pub fn snapshot(vs: &VarStore) -> Self {
        let grads = tch::no_grad(|| {
            vs.trainable_variables()
                .iter()
                .map(|var| {
                    let grad = var.grad();
                    if grad.defined() {
                        grad.detach().copy()
                    } else {
                        var.zeros_like()
                    }
                })
                .collect()
        });

        Self(grads)
    }

    /// Element-wise mean, accumulated as `0 + g_1/n + ... + g_n/n`.
    pub fn mean(all: &[Gradients]) -> Result<Self> {
        let first = all.first().ok_or(Error::EmptyGroup)?;
        let n = all.len() as f64;

        let grads = tch::no_grad(|| {
            let mut acc: Vec<Tensor> = first.0.iter().map(Tensor::zeros_like).collect();
            for grads in all {
                for (a, g) in acc.iter_mut().zip(&grads.0) {
                    *a += g / n;
                }
            }
            acc
        });

        Ok(Self(grads))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.0.iter()
    }
}

impl Index<usize> for Gradients {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Gradients {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
