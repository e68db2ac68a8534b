//! The Riemannian Staircase.
//!
//! Starting at rank `r0`, each level runs the trust-region solver on the
//! rank-restricted problem, certifies the resulting critical point with the
//! minimum eigenpair of `S(Y)`, and either stops or escapes the saddle into
//! rank `r + 1`. Every exit path post-processes the last iterate into
//! bounds and a rounded pose estimate.

use std::time::{Duration, Instant};

use nalgebra::DMatrix;
use num_traits::Float;
use sesync_core::{
    error::{OptimizerError, OptimizerResult},
    types::Scalar,
};
use sesync_optim::{LoggingMonitor, TntMonitor, TntTermination, TrustRegionNewton};

use crate::{
    certify::{certify, Certificate},
    escape::escape_saddle,
    initialization::initial_iterate,
    measurement::RelativePoseMeasurement,
    options::SESyncOpts,
    problem::{SESyncProblem, SynchronizationProblem},
    result::{SESyncResult, SESyncStatus},
};

/// Per-level traces accumulated by the driver.
#[derive(Default)]
struct Traces<T: Scalar> {
    function_values: Vec<Vec<T>>,
    gradient_norms: Vec<Vec<T>>,
    preconditioned_gradient_norms: Vec<Vec<T>>,
    hessian_vector_products: Vec<Vec<usize>>,
    elapsed_optimization_times: Vec<Vec<f64>>,
    iterates: Vec<Vec<DMatrix<T>>>,
    escape_direction_curvatures: Vec<T>,
    lobpcg_iters: Vec<usize>,
    verification_times: Vec<f64>,
    ranks: Vec<usize>,
}

/// Runs the Riemannian Staircase on `problem`.
///
/// `y0`, if given, must have one column per problem coordinate and between
/// `d` and `r0` rows; it is padded with zero rows to rank `r0`.
///
/// # Errors
///
/// Returns `InvalidConfiguration` for invalid options or a malformed `y0`,
/// and propagates numerical failures of the solvers. Time and rank limits
/// are reported through [`SESyncStatus`], not as errors.
pub fn sesync<T, P>(
    problem: &P,
    options: &SESyncOpts<T>,
    y0: Option<&DMatrix<T>>,
) -> OptimizerResult<SESyncResult<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + Sync + ?Sized,
{
    sesync_with_monitor(problem, options, y0, None)
}

/// [`sesync`] with an observer of every trust-region iteration.
///
/// Without a monitor, iterations are logged at `debug` level.
pub fn sesync_with_monitor<T, P>(
    problem: &P,
    options: &SESyncOpts<T>,
    y0: Option<&DMatrix<T>>,
    monitor: Option<&mut (dyn TntMonitor<T> + Send)>,
) -> OptimizerResult<SESyncResult<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + Sync + ?Sized,
{
    options.validate(problem.dimension())?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_threads)
        .build()
        .map_err(|e| {
            OptimizerError::invalid_configuration(
                e.to_string(),
                "num_threads",
                options.num_threads.to_string(),
            )
        })?;
    pool.install(|| run_staircase(problem, options, y0, monitor))
}

/// Builds an [`SESyncProblem`] from `measurements` and runs [`sesync`].
pub fn sesync_from_measurements<T: Scalar>(
    measurements: &[RelativePoseMeasurement<T>],
    options: &SESyncOpts<T>,
    y0: Option<&DMatrix<T>>,
) -> OptimizerResult<SESyncResult<T>> {
    let problem = SESyncProblem::new(
        measurements,
        options.formulation,
        options.projection_factorization,
        options.preconditioner,
        options.reg_cholesky_precon_max_condition_number,
    )?;
    log::debug!(
        "constructed problem with {} poses and {} measurements",
        problem.num_poses(),
        problem.num_measurements()
    );
    sesync(&problem, options, y0)
}

fn run_staircase<T, P>(
    problem: &P,
    options: &SESyncOpts<T>,
    y0: Option<&DMatrix<T>>,
    mut monitor: Option<&mut (dyn TntMonitor<T> + Send)>,
) -> OptimizerResult<SESyncResult<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let start = Instant::now();
    let budget = options.time_budget();
    let level = if options.verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    let mut y = initial_iterate(problem, options.initialization, y0, options.r0)?;
    let initialization_time = start.elapsed().as_secs_f64();
    log::log!(
        level,
        "initialized {:?} problem at rank {} in {:.3} s",
        problem.formulation(),
        options.r0,
        initialization_time
    );

    let lobpcg = options.lobpcg_config();
    let ildl = options.ildl_config();
    let mut traces = Traces::default();
    let mut logger = LoggingMonitor;

    let status = loop {
        let rank = y.nrows();
        let remaining = budget.saturating_sub(start.elapsed());
        if remaining == Duration::ZERO {
            break SESyncStatus::ElapsedTime;
        }
        traces.ranks.push(rank);

        let tnt = TrustRegionNewton::new(options.tnt_config(remaining));
        let level_monitor: &mut dyn TntMonitor<T> = match monitor.as_mut() {
            Some(m) => &mut **m,
            None => &mut logger,
        };
        let run = tnt.optimize(problem, &y, Some(level_monitor))?;
        log::log!(
            level,
            "rank {rank}: TNT stopped ({:?}) after {} iterations, f = {:.6e}, |grad| = {:.3e}",
            run.termination,
            run.iterations,
            Scalar::to_f64(run.value),
            Scalar::to_f64(run.gradient_norm)
        );

        traces.function_values.push(run.objective_values);
        traces.gradient_norms.push(run.gradient_norms);
        traces
            .preconditioned_gradient_norms
            .push(run.preconditioned_gradient_norms);
        traces.hessian_vector_products.push(run.hessian_vector_products);
        traces.elapsed_optimization_times.push(run.elapsed_times);
        traces.iterates.push(run.iterates);
        y = run.point;

        if run.termination == TntTermination::ElapsedTime || start.elapsed() >= budget {
            break SESyncStatus::ElapsedTime;
        }

        let verification_start = Instant::now();
        let verification = certify(problem, &y, &lobpcg, &ildl)?;
        traces.lobpcg_iters.push(verification.iterations);
        traces
            .verification_times
            .push(verification_start.elapsed().as_secs_f64());

        match verification.certificate {
            Certificate::GlobalOpt { theta } => {
                log::log!(
                    level,
                    "rank {rank}: certified optimal, lambda_min(S) = {:.6e}",
                    Scalar::to_f64(theta)
                );
                break SESyncStatus::GlobalOpt;
            }
            Certificate::EigImprecision { theta } => {
                log::warn!(
                    "rank {rank}: minimum eigenvalue estimate {:.6e} not resolved within {} LOBPCG iterations",
                    Scalar::to_f64(theta),
                    options.lobpcg_max_iterations
                );
                break SESyncStatus::EigImprecision;
            }
            Certificate::Escape { theta, direction } => {
                traces.escape_direction_curvatures.push(theta);
                log::log!(
                    level,
                    "rank {rank}: saddle point, lambda_min(S) = {:.6e}",
                    Scalar::to_f64(theta)
                );
                if rank + 1 > options.rmax {
                    break SESyncStatus::MaxRank;
                }
                match escape_saddle(
                    problem,
                    &y,
                    theta,
                    &direction,
                    options.grad_norm_tol,
                    options.preconditioned_grad_norm_tol,
                )? {
                    Some(next) => y = next,
                    None => break SESyncStatus::SaddlePoint,
                }
            }
        }
    };

    let result = finish(problem, y, status, traces, initialization_time, start)?;
    log::log!(
        level,
        "SE-Sync finished with status {:?} at rank {} in {:.3} s: SDPval = {:.6e}, Fxhat = {:.6e}, gap bound = {:.3e}",
        result.status,
        result.final_rank(),
        result.total_computation_time,
        Scalar::to_f64(result.sdp_val),
        Scalar::to_f64(result.fxhat),
        Scalar::to_f64(result.suboptimality_bound)
    );
    Ok(result)
}

fn finish<T, P>(
    problem: &P,
    yopt: DMatrix<T>,
    status: SESyncStatus,
    traces: Traces<T>,
    initialization_time: f64,
    start: Instant,
) -> OptimizerResult<SESyncResult<T>>
where
    T: Scalar,
    P: SynchronizationProblem<T> + ?Sized,
{
    let sdp_val = problem.cost(&yopt)?;
    let egrad = problem.euclidean_gradient(&yopt)?;
    let grad = problem.riemannian_gradient(&yopt, &egrad)?;
    let gradnorm = <T as Float>::sqrt(problem.inner_product(&yopt, &grad, &grad));

    let lambda = problem.lagrange_multiplier(&yopt)?;
    let tr_lambda = lambda.diagonal().sum();
    let xhat = problem.round_solution(&yopt)?;
    let fxhat = problem.evaluate_pose_estimate(&xhat)?;

    Ok(SESyncResult {
        yopt,
        sdp_val,
        gradnorm,
        duality_gap: sdp_val - tr_lambda,
        suboptimality_bound: fxhat - tr_lambda,
        lambda,
        tr_lambda,
        xhat,
        fxhat,
        total_computation_time: start.elapsed().as_secs_f64(),
        initialization_time,
        function_values: traces.function_values,
        gradient_norms: traces.gradient_norms,
        preconditioned_gradient_norms: traces.preconditioned_gradient_norms,
        hessian_vector_products: traces.hessian_vector_products,
        elapsed_optimization_times: traces.elapsed_optimization_times,
        escape_direction_curvatures: traces.escape_direction_curvatures,
        lobpcg_iters: traces.lobpcg_iters,
        verification_times: traces.verification_times,
        iterates: traces.iterates,
        ranks: traces.ranks,
        status,
    })
}
