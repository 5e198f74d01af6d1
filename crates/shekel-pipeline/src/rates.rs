//! Resolution of a set of currency codes into shekel rates.

use std::{collections::BTreeSet, sync::Arc};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use shekel_core::{
  CurrencyCode, ILS,
  rate::{CurrencyRate, FailedLookup, LookupFailure},
  source::RateSource,
};
use tokio::{
  sync::{Semaphore, watch},
  task::JoinSet,
};

use crate::{RetryPolicy, retry::RetryError};

/// Rates that resolved and lookups that did not, both ordered by code.
#[derive(Debug, Clone, Default)]
pub struct RateBatch {
  pub rates:  Vec<CurrencyRate>,
  pub failed: Vec<FailedLookup>,
}

/// Fetches one rate per distinct currency with bounded concurrency.
pub struct RateResolver<R> {
  source: Arc<R>,
  retry:  RetryPolicy,
  limit:  Arc<Semaphore>,
}

impl<R> RateResolver<R>
where
  R: RateSource + 'static,
{
  /// `concurrency` is the number of in-flight upstream calls; zero is
  /// treated as one.
  pub fn new(source: Arc<R>, retry: RetryPolicy, concurrency: usize) -> Self {
    Self {
      source,
      retry,
      limit: Arc::new(Semaphore::new(concurrency.max(1))),
    }
  }

  /// Resolve every code in `codes` to a rate dated `as_of`.
  ///
  /// Each code is fetched at most once. A failure for one code is recorded
  /// in [`RateBatch::failed`] and never affects the others. ILS resolves to
  /// one without an upstream call. Once `shutdown` is set, codes that have
  /// not started fetching are reported as cancelled.
  pub async fn resolve_rates(
    &self,
    codes: &BTreeSet<CurrencyCode>,
    as_of: NaiveDate,
    shutdown: &watch::Receiver<bool>,
  ) -> RateBatch {
    let mut batch = RateBatch::default();
    let mut tasks = JoinSet::new();
    let mut pending = BTreeSet::new();

    for &code in codes {
      if code == ILS {
        match CurrencyRate::new(code, as_of, Decimal::ONE) {
          Ok(rate) => batch.rates.push(rate),
          Err(e) => tracing::error!(%code, error = %e, "could not build unit rate"),
        }
        continue;
      }
      if *shutdown.borrow() {
        batch.failed.push(FailedLookup { code, failure: LookupFailure::Cancelled });
        continue;
      }

      pending.insert(code);
      let source = Arc::clone(&self.source);
      let limit = Arc::clone(&self.limit);
      let retry = self.retry;
      let shutdown = shutdown.clone();
      tasks.spawn(async move {
        let Ok(_permit) = limit.acquire_owned().await else {
          return (code, Err(LookupFailure::Cancelled));
        };
        // Waiting for a permit can outlast a shutdown request.
        if *shutdown.borrow() {
          return (code, Err(LookupFailure::Cancelled));
        }
        (code, lookup(source, retry, &shutdown, code, as_of).await)
      });
    }

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((code, outcome)) => {
          pending.remove(&code);
          match outcome {
            Ok(rate) => batch.rates.push(rate),
            Err(failure) => {
              tracing::warn!(%code, ?failure, "rate lookup failed");
              batch.failed.push(FailedLookup { code, failure });
            }
          }
        }
        Err(e) => tracing::error!(error = %e, "rate lookup task aborted"),
      }
    }

    for code in pending {
      batch.failed.push(FailedLookup {
        code,
        failure: LookupFailure::Transport {
          attempts: 0,
          message:  "lookup task aborted".into(),
        },
      });
    }

    batch.rates.sort_by_key(|r| r.currency_code);
    batch.failed.sort_by_key(|f| f.code);
    batch
  }
}

async fn lookup<R: RateSource>(
  source: Arc<R>,
  retry: RetryPolicy,
  shutdown: &watch::Receiver<bool>,
  code: CurrencyCode,
  as_of: NaiveDate,
) -> Result<CurrencyRate, LookupFailure> {
  tracing::debug!(%code, source = source.name(), "fetching rate");
  let fetched = retry
    .run(&format!("rate {code}"), shutdown, || {
      let source = Arc::clone(&source);
      async move { source.fetch_rate(code, ILS).await }
    })
    .await;

  match fetched {
    Ok(Some(rate)) if rate > Decimal::ZERO => {
      CurrencyRate::new(code, as_of, rate).map_err(|_| LookupFailure::InvalidRate { rate })
    }
    Ok(Some(rate)) => Err(LookupFailure::InvalidRate { rate }),
    Ok(None) => Err(LookupFailure::NotFound),
    Err(RetryError::Cancelled) => Err(LookupFailure::Cancelled),
    Err(RetryError::Transport { attempts, message }) => {
      Err(LookupFailure::Transport { attempts, message })
    }
    Err(e @ RetryError::Timeout { attempts, .. }) => Err(LookupFailure::Transport {
      attempts,
      message: e.to_string(),
    }),
  }
}
