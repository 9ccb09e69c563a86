/// loan lifecycle - draft, activate, fund, repay to completion
use collateral_lending_rs::{
    CollateralSpec, ContractCall, CreateLoanRequest, LendingEngine, MockChainClient,
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== loan lifecycle example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    // wire the engine against in-memory collaborators
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
    engine.register_payout_account(lender, "fa_lender_demo");

    // draft a 3000 loan at 12% over 90 days against 0.05 eth
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
    println!("drafted loan {loan_id}");
    println!(
        "  {} installments of {}",
        loan.total_installments, loan.installment_amount
    );

    // the borrower submits the creation transaction; we verify it
    let tx_hash = "0x00000000000000000000000000000000000000000000000000000000000000aa";
    let collateral = engine.store.collateral(loan.collateral_ref)?.clone();
    let event_signature = engine.config.creation_event_signature.clone();
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
    println!("loan active, collateral locked under {tx_hash}");

    // a lender funds the full principal; settlement arrives by webhook
    let order = engine.initiate_funding(loan_id, lender, Money::from_major(3_000), &time)?;
    let body = captured_body(&order.order_ref);
    let signature = gateway.sign(&body);
    engine.on_funding_webhook(&body, &signature, &time)?;
    let funded = engine.loan(loan_id)?;
    println!(
        "funded on {}; first installment due {}",
        time.now().format("%Y-%m-%d"),
        funded
            .next_due_date
            .map(|due| due.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    );

    // repay month by month
    for round in 1..=3 {
        controller.advance(Duration::days(29));
        let order = engine.pay_installment(loan_id, borrower)?;
        let body = captured_body(&order.order_ref);
        let signature = gateway.sign(&body);
        engine.on_installment_webhook(&body, &signature, &time)?;
        println!(
            "installment {round} settled on {}",
            time.now().format("%Y-%m-%d")
        );
    }

    let done = engine.loan(loan_id)?;
    println!("\nfinal status: {:?}", done.status);
    println!("total paid: {}", done.total_paid);
    println!("lender payouts dispatched: {}", gateway.payouts().len());
    println!("audit events recorded: {}", engine.events.events().len());

    Ok(())
}
