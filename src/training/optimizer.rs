//! Per-phase optimizers.
//!
//! Each parameter group gets its own optimizer over its own `Var`s, so a step
//! in one phase never touches the other phase's variables even though both
//! are present in the same backward graph.

use crate::error::{AdvError, Result};
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Adagrad settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsAdagrad {
    pub lr: f64,
    /// Starting value of every squared-gradient accumulator
    pub initial_accumulator_value: f64,
}

impl Default for ParamsAdagrad {
    fn default() -> Self {
        Self {
            lr: 0.1,
            initial_accumulator_value: 0.1,
        }
    }
}

/// Adagrad: `acc += g²; x -= lr · g / sqrt(acc)`.
pub struct Adagrad {
    vars: Vec<(Var, Tensor)>,
    params: ParamsAdagrad,
}

impl Adagrad {
    fn fresh_accumulator(var: &Var, value: f64) -> candle_core::Result<Tensor> {
        var.as_tensor().ones_like()? * value
    }

    /// Set every accumulator back to its initial value.
    pub fn reset(&mut self) -> candle_core::Result<()> {
        for (var, acc) in self.vars.iter_mut() {
            *acc = Self::fresh_accumulator(var, self.params.initial_accumulator_value)?;
        }
        Ok(())
    }
}

impl Optimizer for Adagrad {
    type Config = ParamsAdagrad;

    fn new(vars: Vec<Var>, params: ParamsAdagrad) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|v| v.dtype().is_float())
            .map(|v| {
                let acc = Self::fresh_accumulator(&v, params.initial_accumulator_value)?;
                Ok((v, acc))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        for (var, acc) in self.vars.iter_mut() {
            if let Some(grad) = grads.get(var.as_tensor()) {
                *acc = (&*acc + grad.sqr()?)?;
                let update = ((grad / acc.sqrt()?)? * self.params.lr)?;
                var.set(&var.as_tensor().sub(&update)?)?;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }
}

/// Optimizer family used for a parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[default]
    Adagrad,
    AdamW,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adagrad" => Ok(OptimizerKind::Adagrad),
            "adamw" | "adam" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(format!("unknown optimizer: {other}")),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::Adagrad => "adagrad",
            OptimizerKind::AdamW => "adamw",
            OptimizerKind::Sgd => "sgd",
        };
        f.write_str(name)
    }
}

/// An optimizer bound to one parameter group, with resettable state.
pub enum PhaseOptimizer {
    Adagrad(Adagrad),
    AdamW {
        inner: AdamW,
        vars: Vec<Var>,
        params: ParamsAdamW,
    },
    Sgd(SGD),
}

impl PhaseOptimizer {
    pub fn new(
        kind: OptimizerKind,
        vars: Vec<Var>,
        lr: f64,
        initial_accumulator_value: f64,
    ) -> Result<Self> {
        if !(lr > 0.0) {
            return Err(AdvError::Config(format!("learning rate must be positive, got {lr}")));
        }
        Ok(match kind {
            OptimizerKind::Adagrad => PhaseOptimizer::Adagrad(Adagrad::new(
                vars,
                ParamsAdagrad {
                    lr,
                    initial_accumulator_value,
                },
            )?),
            OptimizerKind::AdamW => {
                let params = ParamsAdamW {
                    lr,
                    beta1: 0.9,
                    beta2: 0.999,
                    eps: 1e-8,
                    weight_decay: 0.0,
                };
                PhaseOptimizer::AdamW {
                    inner: AdamW::new(vars.clone(), params.clone())?,
                    vars,
                    params,
                }
            }
            OptimizerKind::Sgd => PhaseOptimizer::Sgd(SGD::new(vars, lr)?),
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            PhaseOptimizer::Adagrad(opt) => opt.step(grads)?,
            PhaseOptimizer::AdamW { inner, .. } => inner.step(grads)?,
            PhaseOptimizer::Sgd(opt) => opt.step(grads)?,
        }
        Ok(())
    }

    /// Forget all accumulated optimizer state.
    pub fn reset(&mut self) -> Result<()> {
        match self {
            PhaseOptimizer::Adagrad(opt) => opt.reset()?,
            PhaseOptimizer::AdamW { inner, vars, params } => {
                *inner = AdamW::new(vars.clone(), params.clone())?;
            }
            PhaseOptimizer::Sgd(_) => {}
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            PhaseOptimizer::Adagrad(opt) => opt.learning_rate(),
            PhaseOptimizer::AdamW { inner, .. } => inner.learning_rate(),
            PhaseOptimizer::Sgd(opt) => opt.learning_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn test_adagrad_first_step() {
        let x = Var::new(&[1.0f32, -2.0], &Device::Cpu).unwrap();
        let mut opt = Adagrad::new(
            vec![x.clone()],
            ParamsAdagrad {
                lr: 0.1,
                initial_accumulator_value: 0.1,
            },
        )
        .unwrap();

        // d/dx sum(x²) = 2x
        let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();

        let got: Vec<f32> = x.as_tensor().to_vec1().unwrap();
        let expected0 = 1.0 - 0.1 * 2.0 / (0.1f32 + 4.0).sqrt();
        let expected1 = -2.0 + 0.1 * 4.0 / (0.1f32 + 16.0).sqrt();
        assert_abs_diff_eq!(got[0], expected0, epsilon = 1e-5);
        assert_abs_diff_eq!(got[1], expected1, epsilon = 1e-5);
    }

    #[test]
    fn test_adagrad_reset_restores_step_size() {
        let x = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let mut opt = Adagrad::new(vec![x.clone()], ParamsAdagrad::default()).unwrap();

        // constant gradient 1: steps shrink as the accumulator grows
        let step = |opt: &mut Adagrad| {
            let before: Vec<f32> = x.as_tensor().to_vec1().unwrap();
            opt.backward_step(&x.as_tensor().sum_all().unwrap()).unwrap();
            let after: Vec<f32> = x.as_tensor().to_vec1().unwrap();
            before[0] - after[0]
        };
        let first = step(&mut opt);
        let second = step(&mut opt);
        assert!(second < first);

        opt.reset().unwrap();
        let after_reset = step(&mut opt);
        assert_abs_diff_eq!(after_reset, first, epsilon = 1e-6);
    }

    #[test]
    fn test_phase_optimizer_only_steps_its_group() {
        let mine = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let other = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let mut opt = PhaseOptimizer::new(OptimizerKind::Sgd, vec![mine.clone()], 0.5, 0.1).unwrap();

        let loss = (mine.as_tensor() * other.as_tensor()).unwrap().sum_all().unwrap();
        opt.step(&loss.backward().unwrap()).unwrap();

        assert_eq!(mine.as_tensor().to_vec1::<f32>().unwrap(), vec![0.5]);
        assert_eq!(other.as_tensor().to_vec1::<f32>().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_optimizer_kind_parse() {
        assert_eq!("Adagrad".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adagrad);
        assert_eq!("adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
        assert!("lbfgs".parse::<OptimizerKind>().is_err());
    }
}
