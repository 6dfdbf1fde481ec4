use riskd_schemas::Severity;

/// The twelve rule plugins, closed over as a tagged enum rather than
/// runtime-discovered plugin classes — adding coverage means adding a
/// variant, not loading code at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleKind {
    MaxContracts,
    MaxContractsPerInstrument,
    DailyRealizedLoss,
    DailyRealizedProfit,
    UnrealizedLoss,
    UnrealizedProfit,
    TradeFrequencyLimit,
    CooldownAfterLoss,
    NoStopLossGrace,
    SessionBlockOutside,
    SymbolBlock,
    AuthLossGuard,
}

impl RuleKind {
    pub const ALL: [RuleKind; 12] = [
        RuleKind::MaxContracts,
        RuleKind::MaxContractsPerInstrument,
        RuleKind::DailyRealizedLoss,
        RuleKind::DailyRealizedProfit,
        RuleKind::UnrealizedLoss,
        RuleKind::UnrealizedProfit,
        RuleKind::TradeFrequencyLimit,
        RuleKind::CooldownAfterLoss,
        RuleKind::NoStopLossGrace,
        RuleKind::SessionBlockOutside,
        RuleKind::SymbolBlock,
        RuleKind::AuthLossGuard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RuleKind::MaxContracts => "max_contracts",
            RuleKind::MaxContractsPerInstrument => "max_contracts_per_instrument",
            RuleKind::DailyRealizedLoss => "daily_realized_loss",
            RuleKind::DailyRealizedProfit => "daily_realized_profit",
            RuleKind::UnrealizedLoss => "unrealized_loss",
            RuleKind::UnrealizedProfit => "unrealized_profit",
            RuleKind::TradeFrequencyLimit => "trade_frequency_limit",
            RuleKind::CooldownAfterLoss => "cooldown_after_loss",
            RuleKind::NoStopLossGrace => "no_stop_loss_grace",
            RuleKind::SessionBlockOutside => "session_block_outside",
            RuleKind::SymbolBlock => "symbol_block",
            RuleKind::AuthLossGuard => "auth_loss_guard",
        }
    }

    /// Severity mapping: 3,4,10 critical; 1,2,5,6,7,9,11 warning; 8,12 info.
    pub fn severity(self) -> Severity {
        match self {
            RuleKind::DailyRealizedLoss | RuleKind::DailyRealizedProfit | RuleKind::SessionBlockOutside => {
                Severity::Critical
            }
            RuleKind::CooldownAfterLoss | RuleKind::AuthLossGuard => Severity::Info,
            _ => Severity::Warning,
        }
    }

    /// Tie-break order within equal severity: SessionBlock/SymbolBlock →
    /// Daily (loss/profit) → Unrealized per-trade → Contract limits →
    /// Frequency/cooldown → Grace. AuthLossGuard is sent-only and never
    /// competes for execution priority against position-mutating actions,
    /// so it sorts last.
    pub fn tie_break_rank(self) -> u8 {
        match self {
            RuleKind::SessionBlockOutside | RuleKind::SymbolBlock => 0,
            RuleKind::DailyRealizedLoss | RuleKind::DailyRealizedProfit => 1,
            RuleKind::UnrealizedLoss | RuleKind::UnrealizedProfit => 2,
            RuleKind::MaxContracts | RuleKind::MaxContractsPerInstrument => 3,
            RuleKind::TradeFrequencyLimit | RuleKind::CooldownAfterLoss => 4,
            RuleKind::NoStopLossGrace => 5,
            RuleKind::AuthLossGuard => 6,
        }
    }
}
