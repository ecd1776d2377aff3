use clap::Args;

use crate::cli::utils::*;
use crate::cli::{connect, OutputFormat};
use crate::client::{Method, RequestOptions};

#[derive(Args)]
pub struct RequestArgs {
    #[arg(help = "HTTP method (GET, POST, PUT, PATCH, DELETE)")]
    pub method: Method,

    #[arg(help = "Path relative to the API base URL, or an absolute URL")]
    pub path: String,

    #[arg(long, help = "JSON body (reads stdin for POST/PUT/PATCH when omitted)")]
    pub data: Option<String>,

    #[arg(long = "query", short = 'q', help = "Query parameter as key=value, repeatable")]
    pub query: Vec<String>,

    #[arg(long = "header", short = 'H', help = "Extra header as name=value, repeatable")]
    pub headers: Vec<String>,

    #[arg(long, help = "Print the whole response body instead of its data field")]
    pub raw: bool,
}

pub async fn handle(args: RequestArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = connect()?;

    let body = match (args.method, args.data) {
        (_, Some(data)) => Some(read_json_body(Some(data))?),
        (Method::Post | Method::Put | Method::Patch, None) => Some(read_json_body(None)?),
        _ => None,
    };

    let mut options = RequestOptions {
        query: parse_pairs(&args.query)?,
        ..RequestOptions::default()
    };
    for (name, value) in parse_pairs(&args.headers)? {
        options = options.header(name, value);
    }

    let response = client.request(args.method, &args.path, body, options).await?;
    if args.raw {
        output_value(&output_format, &response.body)
    } else {
        output_value(&output_format, response.data())
    }
}
