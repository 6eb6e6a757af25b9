use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use studenthub::config::Config;
use studenthub::hub::{CachedHubClient, Credentials, FeedPage, PostDetail};
use studenthub::logging;

#[derive(Parser, Debug)]
#[command(name = "studenthub")]
#[command(about = "Command-line client for the StudentHub forum")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./studenthub.yaml, then $XDG_CONFIG_HOME/studenthub/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and remember the session
  Login {
    username: String,
    /// Read from stdin when omitted
    #[arg(long)]
    password: Option<String>,
  },
  /// End the session
  Logout,
  /// Show the logged-in user
  Whoami,
  /// List one page of a category feed
  Feed {
    category: String,
    #[arg(short, long, default_value_t = 0)]
    page: u32,
    /// Only show posts whose title or opening text contains this
    #[arg(short, long)]
    search: Option<String>,
  },
  /// Show a post with its comments and tags
  Post { id: String },
  /// List categories
  Categories,
  /// List tags
  Tags,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = logging::init(&Config::data_dir()?)?;

  let client = CachedHubClient::connect(&config).await?;

  match args.command {
    Command::Login { username, password } => {
      let password = match password {
        Some(p) => p,
        None => read_password()?,
      };
      client.sign_in(&Credentials::new(&username, password)).await?;
      println!("Logged in as {}", username);
    }
    Command::Logout => {
      client.sign_out().await?;
      println!("Logged out");
    }
    Command::Whoami => {
      let user = client.current_user().await?;
      println!("{} ({})", user.username, user.id);
      if let Some(email) = &user.email {
        println!("{}", email);
      }
    }
    Command::Feed {
      category,
      page,
      search,
    } => {
      let feed = client.feed(&category, page).await?;
      print_feed(&feed, search.as_deref().unwrap_or(""));
    }
    Command::Post { id } => {
      let detail = client.post_detail(&id).await?;
      print_post(&detail);
    }
    Command::Categories => {
      for category in client.categories().await?.iter() {
        match &category.description {
          Some(description) => println!("{}  {} - {}", category.id, category.name, description),
          None => println!("{}  {}", category.id, category.name),
        }
      }
    }
    Command::Tags => {
      for tag in client.tags().await?.iter() {
        println!("{}  {}", tag.id, tag.name);
      }
    }
  }

  Ok(())
}

fn read_password() -> Result<String> {
  print!("Password: ");
  io::stdout().flush()?;

  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  let password = line.trim_end_matches(['\r', '\n']).to_string();
  if password.is_empty() {
    return Err(eyre!("No password given"));
  }
  Ok(password)
}

fn print_feed(feed: &FeedPage, search: &str) {
  let posts = feed.filter(search);
  if posts.is_empty() {
    println!("No posts");
    return;
  }
  for post in posts {
    let author = feed
      .author_of(post)
      .map(|u| u.username.as_str())
      .unwrap_or("unknown");
    println!("{}  {}  by {}", post.id, post.title, author);
  }
}

fn print_post(detail: &PostDetail) {
  let post = &detail.post;
  println!("{}", post.title);
  print!("by {}", detail.author.username);
  if let Some(category) = &detail.category {
    print!(" in {}", category.name);
  }
  println!();
  if !detail.tags.is_empty() {
    let names: Vec<_> = detail.tags.iter().map(|t| t.name.as_str()).collect();
    println!("tags: {}", names.join(", "));
  }
  println!();
  println!("{}", post.content);

  if !detail.comments.is_empty() {
    println!();
    println!("{} comment(s)", detail.comments.len());
    for comment in &detail.comments {
      let author = comment.author_id.as_deref().unwrap_or("unknown");
      println!("- {}: {}", author, comment.content);
    }
  }
}
