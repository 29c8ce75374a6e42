//! Hammers a running server with concurrent double votes and checks that every
//! voter was counted exactly once.
use anyhow::{Context, Error, bail};
use clap::Parser;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://localhost:1111")]
    url: String,

    #[arg(long, default_value_t = 50)]
    voters: usize,

    /// Simultaneous casts fired per voter.
    #[arg(long, default_value_t = 3)]
    attempts: usize,
}

async fn register(client: &Client, url: &str, username: &str) -> Result<String, Error> {
    let response: Value = client
        .post(format!("{url}/auth/register"))
        .json(&json!({ "username": username, "password": "tester-pass", "fullName": username }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    response["token"]
        .as_str()
        .map(str::to_string)
        .context("register response without token")
}

async fn stand(client: &Client, url: &str, token: &str) -> Result<String, Error> {
    let response: Value = client
        .post(format!("{url}/candidates/register"))
        .bearer_auth(token)
        .json(&json!({ "candidateName": "Load Test", "party": "Tester", "manifesto": "Count me" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    response["candidate"]["id"]
        .as_str()
        .map(str::to_string)
        .context("candidate response without id")
}

async fn cast(
    client: &Client,
    url: &str,
    token: &str,
    candidate: &str,
) -> Result<StatusCode, Error> {
    Ok(client
        .post(format!("{url}/votes"))
        .bearer_auth(token)
        .json(&json!({ "candidateId": candidate }))
        .send()
        .await?
        .status())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    let client = Client::new();
    let run = Uuid::new_v4().simple().to_string();
    let run = &run[..8];

    let owner = register(&client, &args.url, &format!("owner{run}")).await?;
    let candidate = stand(&client, &args.url, &owner).await?;
    println!("Candidate: {candidate}");

    let (_, before) = results(&client, &args.url, &candidate).await?;

    let pb = ProgressBar::new(args.voters as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let mut created = 0;
    let mut conflicts = 0;
    let mut other = 0;

    for n in 0..args.voters {
        let token = register(&client, &args.url, &format!("voter{run}{n}")).await?;
        pb.set_message(format!("voter {n}"));

        let attempts = (0..args.attempts).map(|_| cast(&client, &args.url, &token, &candidate));
        for status in join_all(attempts).await {
            match status? {
                StatusCode::CREATED => created += 1,
                StatusCode::CONFLICT => conflicts += 1,
                _ => other += 1,
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");

    let (total_votes, after) = results(&client, &args.url, &candidate).await?;

    println!("\nAccepted: {created}");
    println!("Already voted: {conflicts}");
    println!("Other: {other}");
    println!("Total votes on server: {total_votes}");
    println!("Candidate gained: {}", after - before);

    if created != args.voters || after - before != args.voters as u64 {
        bail!("expected exactly one counted vote per voter");
    }

    println!("Every voter counted exactly once.");

    Ok(())
}

async fn results(client: &Client, url: &str, candidate: &str) -> Result<(u64, u64), Error> {
    let tally: Value = client
        .get(format!("{url}/votes/results"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let count = tally["results"]
        .as_array()
        .and_then(|results| {
            results
                .iter()
                .find(|standing| standing["candidateId"] == candidate)
        })
        .and_then(|standing| standing["voteCount"].as_u64())
        .unwrap_or(0);

    Ok((tally["totalVotes"].as_u64().unwrap_or(0), count))
}
