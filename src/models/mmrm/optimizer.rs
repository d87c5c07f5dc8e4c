//! `argmin` adapters for the profiled MMRM objective.
//!
//! The cost is `+∞` outside the covariance parameter domain. Gradients are
//! finite differences of the cost; a point where no finite gradient exists
//! is reported as an error so that the line search abandons it.

use argmin::core::{
    CostFunction, Error, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use finitediff::FiniteDiff;

use super::likelihood::MmrmProblem;
use super::types::{MmrmError, Optimizer, OptimizerControl};

const LBFGS_MEMORY: usize = 10;
const NM_INITIAL_STEP: f64 = 0.25;
/// Nelder-Mead moves one vertex per iteration, so it gets a larger budget.
const NM_ITERATIONS_PER_STEP: u64 = 20;

/// Outcome of one minimisation.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub parameters: Vec<f64>,
    pub fval: f64,
    pub n_iter: usize,
    pub converged: bool,
}

/// Profiled negative log-likelihood as an `argmin` problem.
#[derive(Clone, Copy)]
pub struct ProfileCost<'p, 'a> {
    problem: &'p MmrmProblem<'a>,
}

impl<'p, 'a> ProfileCost<'p, 'a> {
    #[must_use]
    pub const fn new(problem: &'p MmrmProblem<'a>) -> Self {
        Self { problem }
    }

    fn value(&self, theta: &[f64]) -> f64 {
        self.problem
            .profile(theta)
            .map_or(f64::INFINITY, |profile| profile.neg_log_lik)
    }
}

impl CostFunction for ProfileCost<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.value(theta))
    }
}

impl Gradient for ProfileCost<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    /// Central differences, or forward differences where a central step
    /// leaves the domain.
    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        let cost = |point: &Vec<f64>| self.value(point);
        let central = theta.central_diff(&cost);
        if central.iter().all(|g| g.is_finite()) {
            return Ok(central);
        }
        let forward = theta.forward_diff(&cost);
        if forward.iter().all(|g| g.is_finite()) {
            Ok(forward)
        } else {
            Err(Error::msg("no finite gradient at the current covariance parameters"))
        }
    }
}

/// Limited-memory BFGS with a More-Thuente line search from `init`.
///
/// Converges when the gradient norm falls below `control.tolerance` or the
/// cost decrease of an iteration falls below a tenth of it.
///
/// # Errors
///
/// Returns `MmrmError::Optimizer` if the solver cannot be configured or the
/// line search fails.
pub fn lbfgs(
    problem: &MmrmProblem<'_>,
    init: &[f64],
    control: &OptimizerControl,
) -> Result<OptimizationResult, MmrmError> {
    let failed = |err: Error| MmrmError::Optimizer {
        optimizer: Optimizer::Bfgs,
        message: err.to_string(),
    };
    let solver = LBFGS::new(MoreThuenteLineSearch::new(), LBFGS_MEMORY)
        .with_tolerance_grad(control.tolerance)
        .and_then(|solver| solver.with_tolerance_cost(0.1 * control.tolerance))
        .map_err(failed)?;
    let init = init.to_vec();
    let result = Executor::new(ProfileCost::new(problem), solver)
        .configure(|state| state.param(init).max_iters(max_iters(control)))
        .run()
        .map_err(failed)?;
    summarise(result.state(), Optimizer::Bfgs)
}

/// Nelder-Mead simplex from `init` with an initial step of 0.25 on every
/// coordinate.
///
/// Converges when the standard deviation of the simplex costs falls below
/// `control.tolerance²`.
///
/// # Errors
///
/// Returns `MmrmError::Optimizer` if the solver cannot be configured.
pub fn nelder_mead(
    problem: &MmrmProblem<'_>,
    init: &[f64],
    control: &OptimizerControl,
) -> Result<OptimizationResult, MmrmError> {
    let failed = |err: Error| MmrmError::Optimizer {
        optimizer: Optimizer::NelderMead,
        message: err.to_string(),
    };
    let mut simplex = vec![init.to_vec()];
    for coordinate in 0..init.len() {
        let mut vertex = init.to_vec();
        vertex[coordinate] += NM_INITIAL_STEP;
        simplex.push(vertex);
    }
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(control.tolerance * control.tolerance)
        .map_err(failed)?;
    let budget = max_iters(control).saturating_mul(NM_ITERATIONS_PER_STEP);
    let result = Executor::new(ProfileCost::new(problem), solver)
        .configure(|state| state.max_iters(budget))
        .run()
        .map_err(failed)?;
    summarise(result.state(), Optimizer::NelderMead)
}

fn max_iters(control: &OptimizerControl) -> u64 {
    u64::try_from(control.max_iter).unwrap_or(u64::MAX)
}

fn summarise<S>(state: &S, optimizer: Optimizer) -> Result<OptimizationResult, MmrmError>
where
    S: State<Param = Vec<f64>, Float = f64>,
{
    let parameters = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| MmrmError::Optimizer {
            optimizer,
            message: "no parameters were evaluated".to_string(),
        })?;
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    Ok(OptimizationResult {
        parameters,
        fval: state.get_best_cost(),
        n_iter: usize::try_from(state.get_iter()).unwrap_or(usize::MAX),
        converged,
    })
}
