use std::error::Error;

use iot_dashboard_sdk::api_client::ApiClient;
use iot_dashboard_sdk::config::DashboardConfig;
use iot_dashboard_sdk::live::LiveDeviceFeed;
use iot_dashboard_sdk::poller::Poller;
use iot_dashboard_sdk::realtime::proto::{DeviceEventMsg, EVENT_DEVICE_STATUS};
use iot_dashboard_sdk::realtime::RealtimeClient;
use iot_dashboard_sdk::services::{DeviceService, SensorService};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DashboardConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: DashboardConfig) -> Result<(), Box<dyn Error>> {
    let api = ApiClient::from_config(&config)?;
    let devices = DeviceService::new(api.clone());
    let sensors = SensorService::new(api);
    let realtime = RealtimeClient::from_config(&config)?;

    let listed = devices.list().await?;
    let Some(device) = listed.first() else {
        println!("no devices registered");
        return Ok(());
    };
    println!(
        "watching {} ({}) every {:?}",
        device.name,
        device.device_id,
        device.poll_interval()
    );

    let _status = realtime.subscribe_typed(EVENT_DEVICE_STATUS, |event: DeviceEventMsg| {
        println!("status device={} fields={:?}", event.device_id, event.fields);
    });

    let device_list = devices.clone();
    let device_poller = Poller::spawn(
        "devices",
        config.refresh.devices,
        move || {
            let devices = device_list.clone();
            async move { devices.list().await }
        },
        |result| {
            if let Ok(devices) = result {
                let online = devices.iter().filter(|device| device.is_online).count();
                println!("devices online={online}/{}", devices.len());
            }
        },
    );

    let feed = LiveDeviceFeed::for_device(&realtime, sensors, device);
    let mut readings = feed.readings();
    for _ in 0..10 {
        if readings.changed().await.is_err() {
            break;
        }
        if let Some(latest) = readings.borrow_and_update().first() {
            println!(
                "{} temperature={:?} humidity={:?} at {}",
                latest.device_id, latest.temperature, latest.humidity, latest.timestamp
            );
        }
    }

    device_poller.stop().await;
    drop(feed);
    realtime.disconnect();
    Ok(())
}
