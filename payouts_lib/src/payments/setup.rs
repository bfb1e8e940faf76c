// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use super::error::PaymentError;
use super::{PaymentProcessor, PaymentSettings};
use crate::config::{ConfigurationError, PoolConfig};
use crate::daemon::CoinDaemon;
use crate::store::LedgerStore;
use crate::utils::time_provider::TimeProvider;
use payouts_accounting::CoinUnits;
use std::sync::Arc;
use tracing::{error, info};

async fn check_address<F>(
    coin: &str,
    label: &str,
    address: &str,
    check: F,
) -> Result<(), PaymentError>
where
    F: std::future::Future<Output = Result<bool, coindrpc::CoinRpcError>>,
{
    match check.await {
        Ok(true) => Ok(()),
        Ok(false) => {
            error!("{}: daemon does not own {} {}", coin, label, address);
            Err(ConfigurationError(format!("{coin}: {label} {address} is not valid")).into())
        }
        Err(e) => {
            error!("{}: error validating {} {}: {}", coin, label, address, e);
            Err(ConfigurationError(format!(
                "{coin}: could not validate {label} {address}: {e}"
            ))
            .into())
        }
    }
}

impl PaymentProcessor {
    /// Validate the pool against its daemon and build a processor for it.
    ///
    /// Coin precision is taken from the way the daemon formats the wallet
    /// balance, so the minimum payment and every ledger amount use the
    /// daemon's own number of decimals.
    pub async fn setup(
        pool: &PoolConfig,
        daemon: Arc<dyn CoinDaemon>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self, PaymentError> {
        pool.validate()?;
        let coin = pool.coin.name.as_str();

        let address = pool.address.as_str();
        if pool.btc_over_17 {
            check_address(coin, "pool address", address, daemon.address_info_valid(address))
                .await?;
        } else {
            check_address(coin, "pool address", address, daemon.validate_address(address))
                .await?;
        }
        if pool.coin.require_shielding {
            let (Some(t_address), Some(z_address)) = (&pool.t_address, &pool.z_address) else {
                return Err(ConfigurationError(format!(
                    "{coin}: require_shielding needs both t_address and z_address"
                ))
                .into());
            };
            check_address(coin, "t_address", t_address, daemon.validate_address(t_address))
                .await?;
            check_address(
                coin,
                "z_address",
                z_address,
                daemon.z_validate_address(z_address),
            )
            .await?;
        }

        let raw_balance = daemon.get_balance_raw().await.map_err(|e| {
            error!("{}: error detecting number of satoshis in a coin: {}", coin, e);
            ConfigurationError(format!("{coin}: could not read wallet balance: {e}"))
        })?;
        let units = CoinUnits::detect(&raw_balance).ok_or_else(|| {
            ConfigurationError(format!(
                "{coin}: cannot detect coin precision from balance {raw_balance:?}"
            ))
        })?;
        info!(
            "{}: coin precision {} ({} satoshis per coin)",
            coin,
            units.precision(),
            units.magnitude()
        );

        pool.payment_processing.warn_risky_settings(coin);
        let settings = PaymentSettings::from_config(pool, units);
        info!(
            "{}: payment processing set up, mode {:?}, every {}s, minimum payment {} satoshis",
            coin,
            settings.payment_mode,
            pool.payment_processing.effective_payment_interval().as_secs(),
            settings.minimum_payment
        );
        Ok(Self::new(settings, daemon, ledger, clock))
    }
}
