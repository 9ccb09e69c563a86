/// time control - deterministic clocks and the default grace boundary
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
    println!("=== time control example ===\n");

    // create controlled time for testing
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();
    println!("starting date: {}", time.now().format("%Y-%m-%d"));

    let config = PlatformConfig::standard("0xC0FFEE00000000000000000000000000000000EE");
    let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));
    let gateway = MockSettlementGateway::new();
    let chain = MockChainClient::new(config.contract_address.clone());
    let mut engine = LendingEngine::new(
        config,
        Box::new(oracle),
        Box::new(gateway.clone()),
        Box::new(chain.clone()),
    );

    let borrower = Uuid::new_v4();
    let lender = Uuid::new_v4();
    engine.register_payout_account(lender, "fa_lender_settlement");

    // draft, activate, and fund at t=0
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
    let tx_hash = "0x00000000000000000000000000000000000000000000000000000000000000bb";
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

    let loan = engine.loan(loan_id)?;
    if let Some(due) = loan.next_due_date {
        println!("funded; first installment due {}", due.format("%Y-%m-%d"));
    }

    // the borrower pays once, a day early
    controller.advance(Duration::days(29));
    println!("\nadvanced to: {}", time.now().format("%Y-%m-%d"));
    let order = engine.pay_installment(loan_id, borrower)?;
    let body = captured_body(&order.order_ref);
    let signature = gateway.sign(&body);
    engine.on_installment_webhook(&body, &signature, &time)?;

    let loan = engine.loan(loan_id)?;
    println!("installment 1 settled, status {:?}", loan.status);
    if let Some(due) = loan.next_due_date {
        println!("next installment due {}", due.format("%Y-%m-%d"));
    }

    // then goes quiet. the due date plus three days of grace passes
    controller.advance(Duration::days(33));
    println!(
        "\nadvanced to: {} (due date + grace, to the second)",
        time.now().format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "in default: {}",
        engine.check_loan_default(loan_id, &time)?
    );

    // default requires the boundary to lie strictly in the past
    controller.advance(Duration::seconds(1));
    println!(
        "\nadvanced to: {} (one second later)",
        time.now().format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "in default: {}",
        engine.check_loan_default(loan_id, &time)?
    );

    engine.mark_loan_as_defaulted(loan_id, &time)?;
    let loan = engine.loan(loan_id)?;
    println!("\nloan marked as defaulted, final status: {:?}", loan.status);

    Ok(())
}
