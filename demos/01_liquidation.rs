/// liquidation - two-phase disposal after default and after a price crash
use collateral_lending_rs::{
    CollateralSpec, ContractCall, CreateLoanRequest, LendingEngine, LoanId, MockChainClient,
    MockPriceOracle, MockSettlementGateway, Money, PlatformConfig, SafeTimeProvider, TimeSource,
    TokenType, Uuid,
};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

fn captured_body(order_ref: &str) -> Vec<u8> {
    format!(
        r#"{{"event":"payment.captured","payload":{{"payment":{{"entity":{{"order_id":"{order_ref}","status":"captured"}}}}}}}}"#
    )
    .into_bytes()
}

struct Setup {
    engine: LendingEngine,
    oracle: MockPriceOracle,
    time: SafeTimeProvider,
}

/// drafts, activates, and funds one loan: 3000 at 12% over 90 days
/// against 0.05 eth priced at 200k
fn funded_loan() -> Result<(Setup, LoanId), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let config = PlatformConfig::standard("0xC0FFEE00000000000000000000000000000000EE");
    let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));
    let gateway = MockSettlementGateway::new();
    let chain = MockChainClient::new(config.contract_address.clone());
    let mut engine = LendingEngine::new(
        config,
        Box::new(oracle.clone()),
        Box::new(gateway.clone()),
        Box::new(chain.clone()),
    );

    let borrower = Uuid::new_v4();
    let lender = Uuid::new_v4();
    let loan_id = engine.create_loan(
        CreateLoanRequest {
            borrower_id: borrower,
            collateral: CollateralSpec {
                token_type: TokenType::Eth,
                amount: Money::from_decimal(dec!(0.05)),
            },
            principal: Money::from_major(3_000),
            interest_rate_bps: 1_200,
            ltv_bps: 3_000,
            duration_days: 90,
        },
        &time,
    )?;

    let loan = engine.loan(loan_id)?.clone();
    let collateral = engine.store.collateral(loan.collateral_ref)?.clone();
    let event_signature = engine.config.creation_event_signature.clone();
    let tx_hash = "0x00000000000000000000000000000000000000000000000000000000000000aa";
    chain.script_creation(
        tx_hash,
        ContractCall::CreateLoan {
            loan_id: loan.id.to_string(),
            amount: loan.principal,
            interest_rate_bps: loan.interest_rate_bps,
            ltv_bps: loan.ltv_bps,
            duration_seconds: loan.duration_seconds,
            collateral_token: collateral.token_type,
            collateral_amount: collateral.amount,
        },
        &event_signature,
    );
    engine.confirm_onchain_creation(loan_id, tx_hash, &time)?;

    let order = engine.initiate_funding(loan_id, lender, Money::from_major(3_000), &time)?;
    let body = captured_body(&order.order_ref);
    let signature = gateway.sign(&body);
    engine.on_funding_webhook(&body, &signature, &time)?;

    Ok((
        Setup {
            engine,
            oracle,
            time,
        },
        loan_id,
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== liquidation example ===\n");

    // --- default path: the borrower never pays ---
    let (mut setup, loan_id) = funded_loan()?;
    let controller = setup.time.test_control().unwrap();

    controller.advance(Duration::days(33));
    let at_boundary = setup.engine.can_liquidate(loan_id, &setup.time)?;
    println!(
        "due + grace exactly reached: eligible={} ({})",
        at_boundary.eligible, at_boundary.reason
    );

    controller.advance(Duration::seconds(1));
    let past = setup.engine.can_liquidate(loan_id, &setup.time)?;
    println!(
        "one second past the boundary: eligible={} ({})",
        past.eligible, past.reason
    );

    let trigger = setup.engine.initiate_liquidation(loan_id, &setup.time)?;
    println!("liquidation initiated, trigger {trigger:?}");

    // the reservation blocks a second initiation
    match setup.engine.initiate_liquidation(loan_id, &setup.time) {
        Ok(_) => println!("error: second initiation should have been rejected!"),
        Err(e) => println!("second initiation rejected: {e}"),
    }

    // disposal: 0.0173 eth fetches 3460 at the current price
    let proceeds = setup.engine.confirm_default_liquidation(
        loan_id,
        Money::from_decimal(dec!(0.0173)),
        Money::from_major(3_400),
        &setup.time,
    )?;
    let loan = setup.engine.loan(loan_id)?;
    println!(
        "confirmed: proceeds {proceeds}, final status {:?}\n",
        loan.status
    );

    // --- ltv path: the market crashes, then recovers ---
    let (mut setup, loan_id) = funded_loan()?;

    setup.oracle.set_price(TokenType::Eth, Money::from_major(60_000));
    let crashed = setup.engine.can_liquidate(loan_id, &setup.time)?;
    println!(
        "after the crash: eligible={} ({})",
        crashed.eligible, crashed.reason
    );
    setup.engine.initiate_liquidation(loan_id, &setup.time)?;

    // price recovers before disposal; the desk backs off instead
    setup.oracle.set_price(TokenType::Eth, Money::from_major(210_000));
    setup.engine.cancel_liquidation(loan_id, &setup.time)?;
    let loan = setup.engine.loan(loan_id)?;
    println!(
        "cancelled after recovery: status {:?}, pending={}",
        loan.status,
        loan.pending_liquidation.is_some()
    );

    println!(
        "\nliquidations recorded for this loan: {}",
        setup.engine.liquidation_count(loan_id)
    );

    Ok(())
}
