//! Salubot CLI
//!
//! Local console channel for the resolution pipeline: reads one message per
//! line from stdin and prints the resolved answer, standing in for the
//! WhatsApp transport during development and field testing.

use clap::Parser;
use salubot::knowledge::StaticSource;
use salubot::{phrases, KnowledgeMemory, Language, Orchestrator, SalubotConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How often the expired-session sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Salubot - bilingual health assistant for Equatorial Guinea
#[derive(Parser, Debug)]
#[command(name = "salubot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for persisted memory and config (default: ~/.salubot)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// User id to attribute console messages to
    #[arg(long, default_value = "console")]
    user: String,

    /// Print the statistics snapshot and exit
    #[arg(long)]
    stats: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(SalubotConfig::default_data_dir);
    let config = SalubotConfig::load(&data_dir).await;
    let memory = Arc::new(KnowledgeMemory::open(&config.data_dir).await?);

    if cli.stats {
        let stats = memory.stats().await;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    info!("Starting Salubot (data dir: {})", config.data_dir.display());
    if config.model.is_none() {
        info!("No API key configured; running on local tiers only");
    }

    let mut orchestrator = Orchestrator::new(&config, memory);
    for source in builtin_sources() {
        orchestrator.register_source(source);
    }
    let orchestrator = Arc::new(orchestrator);

    // Periodic session sweep, independent of message processing.
    let sweeper = orchestrator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sweeper.sweep_sessions().await;
        }
    });

    // Blocking stdin reader feeding the async loop.
    let (input_tx, mut input_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    while let Some(line) = input_rx.recv().await {
        let answer = orchestrator.handle_message(&cli.user, &line).await;
        if let Err(e) = writeln!(io::stdout(), "{}\n", answer) {
            error!("Error writing stdout: {}", e);
            break;
        }
        let _ = io::stdout().flush();
    }

    info!("Shutting down");
    Ok(())
}

/// Built-in static knowledge, queried in this order: diseases, then health
/// facilities, then legal and historical facts. Disease answers carry the
/// medical disclaimer, like every informational answer.
fn builtin_sources() -> Vec<Box<dyn salubot::KnowledgeSource>> {
    let disclaimer_es = phrases::disclaimer(Language::Es);
    let disclaimer_fang = phrases::disclaimer(Language::Fang);

    let diseases = StaticSource::new("diseases")
        .with_bilingual_entry(
            &["malaria", "paludismo"],
            &format!(
                "*Malaria (Paludismo)*\n\nEnfermedad transmitida por la picadura del \
                 mosquito Anopheles.\n\n*Síntomas:* fiebre alta, escalofríos, sudores, \
                 dolor de cabeza, vómitos.\n\n*Prevención:* mosquitero tratado, repelente, \
                 eliminar agua estancada.\n\nAnte fiebre alta, acuda al centro de salud \
                 para una prueba de malaria.\n\n{disclaimer_es}"
            ),
            &format!(
                "*Malaria (Paludismo)*\n\nEki ya ntomba Anopheles.\n\n*Minsón:* efie \
                 abeng, ekos, mendzim.\n\nEfie abeng: ke centro ya salud, ba ye bo wo \
                 prueba ya malaria.\n\n{disclaimer_fang}"
            ),
        )
        .with_entry(
            &["tifoidea", "fiebre tifoidea"],
            &format!(
                "*Fiebre tifoidea*\n\nInfección bacteriana por agua o alimentos \
                 contaminados.\n\n*Síntomas:* fiebre prolongada, dolor abdominal, \
                 debilidad.\n\n*Prevención:* hierva el agua, lave los alimentos.\n\n\
                 Requiere antibióticos: acuda al centro de salud.\n\n{disclaimer_es}"
            ),
        )
        .with_entry(
            &["colera", "cólera"],
            &format!(
                "*Cólera*\n\nInfección intestinal aguda por agua contaminada.\n\n\
                 *Síntomas:* diarrea acuosa abundante, vómitos, deshidratación rápida.\n\n\
                 Beba suero oral de inmediato y acuda URGENTE al centro de salud: el \
                 cólera deshidrata en horas.\n\n{disclaimer_es}"
            ),
        )
        .with_entry(
            &["vih", "sida"],
            &format!(
                "*VIH/SIDA*\n\nVirus que debilita las defensas del cuerpo. Con \
                 tratamiento antirretroviral se vive una vida normal.\n\n*Prevención:* \
                 preservativo, pruebas periódicas.\n\nLa prueba es gratuita y \
                 confidencial en los hospitales públicos.\n\n{disclaimer_es}"
            ),
        )
        .with_entry(
            &["tuberculosis"],
            &format!(
                "*Tuberculosis*\n\nInfección pulmonar que se contagia por el aire.\n\n\
                 *Síntomas:* tos de más de 2 semanas, fiebre por las tardes, pérdida \
                 de peso, sudores nocturnos.\n\nEl tratamiento es gratuito en los \
                 centros públicos; no lo abandone a medias.\n\n{disclaimer_es}"
            ),
        );

    let facilities = StaticSource::new("facilities")
        .with_entry(
            &["hospital de malabo", "hospital malabo", "centro malabo"],
            "*Centros de salud - Malabo:*\n\nHospital General de Malabo\n\
             Tel: +240 333 092 524\nUrgencias 24h.\n\n\
             Policlínica Loeri Comba\nBarrio Ela Nguema.",
        )
        .with_entry(
            &["hospital de bata", "hospital bata", "centro bata"],
            "*Centros de salud - Bata:*\n\nHospital Regional de Bata\n\
             Tel: +240 333 082 510\nUrgencias 24h.\n\n\
             Hospital La Paz Bata\nCarretera del aeropuerto.",
        );

    let legal = StaticSource::new("legal").with_entry(
        &["constitución", "constitucion", "ley fundamental"],
        "*Constitución de Guinea Ecuatorial*\n\nLa Ley Fundamental reconoce los \
         derechos y deberes de los ciudadanos y organiza los poderes del Estado \
         (ejecutivo, legislativo y judicial).\n\nPregunta por un tema concreto: \
         derechos, presidente, parlamento...",
    );

    let history = StaticSource::new("history").with_entry(
        &["independencia", "historia de guinea"],
        "*Historia*\n\nGuinea Ecuatorial obtuvo su independencia de España el 12 \
         de octubre de 1968.\n\nPregunta por un periodo concreto: época colonial, \
         independencia, etnias...",
    );

    vec![
        Box::new(diseases),
        Box::new(facilities),
        Box::new(legal),
        Box::new(history),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use salubot::KnowledgeSource;

    #[test]
    fn test_disease_answers_carry_disclaimer() {
        let sources = builtin_sources();
        let diseases = &sources[0];
        assert_eq!(diseases.name(), "diseases");

        let hit = diseases.lookup("qué es la malaria", Language::Es).unwrap();
        assert!(hit.contains("no sustituyo a un médico"));

        let hit = diseases.lookup("malaria", Language::Fang).unwrap();
        assert!(hit.contains("me nse mbó oyen"));
    }
}
