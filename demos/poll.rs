use std::time::Duration;

#[tokio::main]
pub async fn main(){
    let mut battery_client = ogtread::BatteryClient::new("SmartPro-B01234").await.unwrap();
    loop {
        let sample = battery_client.fetch().await.unwrap();
        println!("{sample:?}");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
